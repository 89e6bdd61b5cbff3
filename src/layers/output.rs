use super::Backpropagation;
use super::fully_connected::FullyConnectedLayer;
use crate::backend::Backend;
use crate::error::Result;
use crate::functions::{ActivationType, CostFunctionType};
use crate::tensors::{Tensor, TensorInfo, TensorView};

/// The terminal dense layer of a network, owning the cost function.
///
/// It is the only layer allowed to use a softmax activation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayer {
    dense: FullyConnectedLayer,
    cost: CostFunctionType,
}

impl OutputLayer {
    /// Assembles an output layer from existing parameters.
    ///
    /// # Errors
    /// Returns a shape error when the weights don't map `input` to the bias width.
    pub fn from_parts(
        input: TensorInfo,
        weights: Tensor,
        biases: Tensor,
        activation: ActivationType,
        cost: CostFunctionType,
    ) -> Result<Self> {
        let dense = FullyConnectedLayer::new_unchecked_activation(input, weights, biases, activation)?;
        Ok(Self { dense, cost })
    }

    /// The cost function minimized by training.
    #[must_use]
    pub const fn cost_function(&self) -> CostFunctionType {
        self.cost
    }

    /// Number of output neurons.
    #[must_use]
    pub const fn neurons(&self) -> usize {
        self.dense.neurons()
    }

    /// Shape of one input sample.
    #[must_use]
    pub const fn input_info(&self) -> TensorInfo {
        self.dense.input_info()
    }

    /// Shape of one output sample.
    #[must_use]
    pub const fn output_info(&self) -> TensorInfo {
        self.dense.output_info()
    }

    /// Nonlinearity applied to the activity.
    #[must_use]
    pub const fn activation(&self) -> ActivationType {
        self.dense.activation()
    }

    /// `inputs × outputs` weights.
    #[must_use]
    pub const fn weights(&self) -> &Tensor {
        self.dense.weights()
    }

    /// `1 × outputs` biases.
    #[must_use]
    pub const fn biases(&self) -> &Tensor {
        self.dense.biases()
    }

    /// Average cost of the predictions `yhat` against `y`.
    ///
    /// # Errors
    /// Returns a shape error when the shapes differ.
    pub fn cost(&self, yhat: TensorView<'_>, y: TensorView<'_>) -> Result<f32> {
        self.cost.cost(yhat, y)
    }

    /// Terminal delta `∂C/∂z` for the cached activity `z` and activation `a`.
    ///
    /// # Errors
    /// Returns a shape error when the shapes differ.
    pub fn output_delta(&self, a: TensorView<'_>, y: TensorView<'_>, z: TensorView<'_>) -> Result<Tensor> {
        self.cost.output_delta(a, y, z, self.dense.activation())
    }

    pub(super) fn parameters_mut(&mut self) -> (&mut Tensor, &mut Tensor) {
        self.dense.parameters_mut()
    }

    pub(super) fn forward(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<(Tensor, Tensor)> {
        self.dense.forward(backend, x)
    }

    pub(super) fn infer(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<Tensor> {
        self.dense.infer(backend, x)
    }

    pub(super) fn backpropagate(
        &self,
        backend: &dyn Backend,
        x: TensorView<'_>,
        delta: TensorView<'_>,
        needs_input_gradient: bool,
    ) -> Result<Backpropagation> {
        self.dense.backpropagate(backend, x, delta, needs_input_gradient)
    }
}
