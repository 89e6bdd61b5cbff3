use super::{Backpropagation, Gradient, check_hidden_activation};
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::functions::ActivationType;
use crate::tensors::{Tensor, TensorInfo, TensorView};

/// A dense layer computing `f(x·W + b)`.
///
/// Weights are `inputs × outputs`, biases `1 × outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnectedLayer {
    input: TensorInfo,
    weights: Tensor,
    biases: Tensor,
    activation: ActivationType,
}

impl FullyConnectedLayer {
    /// Assembles a layer from existing parameters.
    ///
    /// # Errors
    /// Returns a shape error when the weights don't map `input` to the bias
    /// width, and [`NetworkError::InvalidArgument`] for a softmax activation.
    pub fn from_parts(
        input: TensorInfo,
        weights: Tensor,
        biases: Tensor,
        activation: ActivationType,
    ) -> Result<Self> {
        check_hidden_activation(activation)?;
        Self::new_unchecked_activation(input, weights, biases, activation)
    }

    pub(super) fn new_unchecked_activation(
        input: TensorInfo,
        weights: Tensor,
        biases: Tensor,
        activation: ActivationType,
    ) -> Result<Self> {
        if weights.entities() != input.size() || weights.length() == 0 {
            return Err(NetworkError::shape_mismatch(
                "FullyConnectedLayer",
                format!("{} weight rows", input.size()),
                format!("{}x{} weights", weights.entities(), weights.length()),
            ));
        }
        if biases.entities() != 1 || biases.length() != weights.length() {
            return Err(NetworkError::shape_mismatch(
                "FullyConnectedLayer",
                format!("1x{} biases", weights.length()),
                format!("{}x{} biases", biases.entities(), biases.length()),
            ));
        }
        Ok(Self {
            input,
            weights,
            biases,
            activation,
        })
    }

    /// Number of output neurons.
    #[must_use]
    pub const fn neurons(&self) -> usize {
        self.weights.length()
    }

    /// Shape of one input sample.
    #[must_use]
    pub const fn input_info(&self) -> TensorInfo {
        self.input
    }

    /// Shape of one output sample.
    #[must_use]
    pub const fn output_info(&self) -> TensorInfo {
        TensorInfo::linear(self.weights.length())
    }

    /// Nonlinearity applied to the activity.
    #[must_use]
    pub const fn activation(&self) -> ActivationType {
        self.activation
    }

    /// `inputs × outputs` weights.
    #[must_use]
    pub const fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// `1 × outputs` biases.
    #[must_use]
    pub const fn biases(&self) -> &Tensor {
        &self.biases
    }

    pub(super) fn parameters_mut(&mut self) -> (&mut Tensor, &mut Tensor) {
        (&mut self.weights, &mut self.biases)
    }

    pub(super) fn forward(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<(Tensor, Tensor)> {
        let z = backend.multiply_with_sum(x, self.weights.view(), self.biases.view())?;
        let a = backend.activation(z.view(), self.activation)?;
        Ok((z, a))
    }

    pub(super) fn infer(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<Tensor> {
        backend.multiply_with_sum_and_activation(x, self.weights.view(), self.biases.view(), self.activation)
    }

    pub(super) fn backpropagate(
        &self,
        backend: &dyn Backend,
        x: TensorView<'_>,
        delta: TensorView<'_>,
        needs_input_gradient: bool,
    ) -> Result<Backpropagation> {
        let weights = backend.transpose_and_multiply(x, delta)?;
        let biases = backend.compress_vertically(delta)?;
        let input_gradient = if needs_input_gradient {
            Some(backend.multiply_by_transposed(delta, self.weights.view())?)
        } else {
            None
        };
        Ok(Backpropagation {
            input_gradient,
            gradient: Some(Gradient { weights, biases }),
        })
    }
}
