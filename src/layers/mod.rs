//! # Layers
//!
//! A network is built out of a small closed set of layers, represented by the
//! [`Layer`] tagged union and identified by a [`LayerKind`] discriminant.
//! Every layer exposes the same two-step contract:
//!
//! - [`Layer::forward`] maps an input batch to the activity `z` and the
//!   activation `a = f(z)`; both are returned because backpropagation needs `z`.
//! - [`Layer::backpropagate`] takes the cached input `x` and the delta `δ` of
//!   this layer and produces the parameter [`Gradient`] (for weighted layers)
//!   and `∂J/∂x`, which the network turns into the previous layer's delta by
//!   multiplying it with `f'(z)` of that layer.
//!
//! Updating the weights is not a layer responsibility: gradients are handed to
//! a [`WeightsUpdater`](crate::optim::WeightsUpdater) by the network.
//!
//! Layers are described independently of their input shape by a
//! [`LayerSpec`], which the network builders resolve into concrete layers.

mod convolutional;
mod fully_connected;
mod init;
mod output;
mod pooling;

pub use self::convolutional::ConvolutionalLayer;
pub use self::fully_connected::FullyConnectedLayer;
pub use self::init::{BiasInitialization, WeightsInitialization};
pub use self::output::OutputLayer;
pub use self::pooling::PoolingLayer;

use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::functions::{ActivationType, CostFunctionType};
use crate::tensors::{Tensor, TensorInfo, TensorView};
use rand::rngs::StdRng;
use serde::Serialize;
use std::fmt;

/// Discriminant of a [`Layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LayerKind {
    /// Dense hidden layer.
    FullyConnected = 0,
    /// Valid convolution.
    Convolutional = 1,
    /// 2×2 max pooling (constant, no parameters).
    Pooling = 2,
    /// Terminal dense layer with a cost function.
    Output = 3,
}

impl TryFrom<u8> for LayerKind {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::FullyConnected),
            1 => Ok(Self::Convolutional),
            2 => Ok(Self::Pooling),
            3 => Ok(Self::Output),
            _ => Err(NetworkError::deserialization(format!("unknown layer tag {value}"))),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FullyConnected => "fully_connected",
            Self::Convolutional => "convolutional",
            Self::Pooling => "pooling",
            Self::Output => "output",
        })
    }
}

/// Weights and biases gradient of one layer for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    /// `∂J/∂W`, same shape as the weights.
    pub weights: Tensor,
    /// `∂J/∂b`, same shape as the biases.
    pub biases: Tensor,
}

/// Result of [`Layer::backpropagate`].
#[derive(Debug)]
pub struct Backpropagation {
    /// `∂J/∂x`, not yet multiplied by the previous layer's `f'(z)`.
    pub input_gradient: Option<Tensor>,
    /// Parameter gradient, `None` for constant layers.
    pub gradient: Option<Gradient>,
}

pub(crate) fn check_hidden_activation(activation: ActivationType) -> Result<()> {
    if activation.is_elementwise() {
        Ok(())
    } else {
        Err(ActivationType::softmax_derivative_error())
    }
}

/// A concrete layer bound to its input shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    /// See [`FullyConnectedLayer`].
    FullyConnected(FullyConnectedLayer),
    /// See [`ConvolutionalLayer`].
    Convolutional(ConvolutionalLayer),
    /// See [`PoolingLayer`].
    Pooling(PoolingLayer),
    /// See [`OutputLayer`].
    Output(OutputLayer),
}

impl Layer {
    /// The layer discriminant.
    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        match self {
            Self::FullyConnected(_) => LayerKind::FullyConnected,
            Self::Convolutional(_) => LayerKind::Convolutional,
            Self::Pooling(_) => LayerKind::Pooling,
            Self::Output(_) => LayerKind::Output,
        }
    }

    /// Shape of one input sample.
    #[must_use]
    pub const fn input_info(&self) -> TensorInfo {
        match self {
            Self::FullyConnected(l) => l.input_info(),
            Self::Convolutional(l) => l.input_info(),
            Self::Pooling(l) => l.input_info(),
            Self::Output(l) => l.input_info(),
        }
    }

    /// Shape of one output sample.
    #[must_use]
    pub const fn output_info(&self) -> TensorInfo {
        match self {
            Self::FullyConnected(l) => l.output_info(),
            Self::Convolutional(l) => l.output_info(),
            Self::Pooling(l) => l.output_info(),
            Self::Output(l) => l.output_info(),
        }
    }

    /// Nonlinearity applied by the layer.
    #[must_use]
    pub const fn activation(&self) -> ActivationType {
        match self {
            Self::FullyConnected(l) => l.activation(),
            Self::Convolutional(l) => l.activation(),
            Self::Pooling(l) => l.activation(),
            Self::Output(l) => l.activation(),
        }
    }

    /// The cost function, for output layers only.
    #[must_use]
    pub const fn cost_function(&self) -> Option<CostFunctionType> {
        match self {
            Self::Output(l) => Some(l.cost_function()),
            _ => None,
        }
    }

    /// The output layer, if this is one.
    #[must_use]
    pub const fn as_output(&self) -> Option<&OutputLayer> {
        match self {
            Self::Output(l) => Some(l),
            _ => None,
        }
    }

    /// Whether the layer has trainable parameters.
    #[must_use]
    pub const fn is_weighted(&self) -> bool {
        !matches!(self, Self::Pooling(_))
    }

    /// The weights, if any.
    #[must_use]
    pub const fn weights(&self) -> Option<&Tensor> {
        match self {
            Self::FullyConnected(l) => Some(l.weights()),
            Self::Convolutional(l) => Some(l.weights()),
            Self::Pooling(_) => None,
            Self::Output(l) => Some(l.weights()),
        }
    }

    /// The biases, if any.
    #[must_use]
    pub const fn biases(&self) -> Option<&Tensor> {
        match self {
            Self::FullyConnected(l) => Some(l.biases()),
            Self::Convolutional(l) => Some(l.biases()),
            Self::Pooling(_) => None,
            Self::Output(l) => Some(l.biases()),
        }
    }

    /// Mutable weights and biases, for optimizers.
    pub fn parameters_mut(&mut self) -> Option<(&mut Tensor, &mut Tensor)> {
        match self {
            Self::FullyConnected(l) => Some(l.parameters_mut()),
            Self::Convolutional(l) => Some(l.parameters_mut()),
            Self::Pooling(_) => None,
            Self::Output(l) => Some(l.parameters_mut()),
        }
    }

    /// Number of trainable values.
    #[must_use]
    pub fn parameters_count(&self) -> usize {
        self.weights().map_or(0, Tensor::size) + self.biases().map_or(0, Tensor::size)
    }

    /// Whether any parameter is NaN or infinite.
    #[must_use]
    pub fn is_in_numeric_overflow(&self) -> bool {
        self.weights().is_some_and(|w| !w.is_finite()) || self.biases().is_some_and(|b| !b.is_finite())
    }

    /// Computes the activity and the activation of a batch.
    ///
    /// # Errors
    /// Returns a shape error when `x` rows don't hold `input_info().size()`
    /// values.
    pub fn forward(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<(Tensor, Tensor)> {
        if x.length() != self.input_info().size() {
            return Err(NetworkError::shape_mismatch(
                "Layer::forward",
                format!("rows of {} values", self.input_info().size()),
                format!("rows of {} values", x.length()),
            ));
        }
        match self {
            Self::FullyConnected(l) => l.forward(backend, x),
            Self::Convolutional(l) => l.forward(backend, x),
            Self::Pooling(l) => l.forward(backend, x),
            Self::Output(l) => l.forward(backend, x),
        }
    }

    /// Inference-only forward pass returning `a`. Dense layers go through
    /// the fused product, bias and activation kernel and never keep `z`.
    ///
    /// # Errors
    /// Same as [`Layer::forward`].
    pub fn infer(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<Tensor> {
        if x.length() != self.input_info().size() {
            return Err(NetworkError::shape_mismatch(
                "Layer::infer",
                format!("rows of {} values", self.input_info().size()),
                format!("rows of {} values", x.length()),
            ));
        }
        match self {
            Self::FullyConnected(l) => l.infer(backend, x),
            Self::Output(l) => l.infer(backend, x),
            Self::Convolutional(_) | Self::Pooling(_) => Ok(self.forward(backend, x)?.1),
        }
    }

    /// Computes the parameter gradient and, when requested, `∂J/∂x`.
    ///
    /// `x` is the input seen by [`Layer::forward`] and `delta` this layer's
    /// `∂J/∂z`.
    ///
    /// # Errors
    /// Returns a shape error when `x` or `delta` don't match the layer.
    pub fn backpropagate(
        &self,
        backend: &dyn Backend,
        x: TensorView<'_>,
        delta: TensorView<'_>,
        needs_input_gradient: bool,
    ) -> Result<Backpropagation> {
        if delta.length() != self.output_info().size() || delta.entities() != x.entities() {
            return Err(NetworkError::shape_mismatch(
                "Layer::backpropagate",
                format!("{}x{}", x.entities(), self.output_info().size()),
                delta.shape_string(),
            ));
        }
        match self {
            Self::FullyConnected(l) => l.backpropagate(backend, x, delta, needs_input_gradient),
            Self::Convolutional(l) => l.backpropagate(backend, x, delta, needs_input_gradient),
            Self::Pooling(l) => l.backpropagate(backend, x, delta, needs_input_gradient),
            Self::Output(l) => l.backpropagate(backend, x, delta, needs_input_gradient),
        }
    }

    /// Structural equality plus parameter equality within `delta`.
    #[must_use]
    pub fn approx_eq_with(&self, other: &Self, delta: f32) -> bool {
        let same_structure = self.kind() == other.kind()
            && self.input_info() == other.input_info()
            && self.output_info() == other.output_info()
            && self.activation() == other.activation()
            && self.cost_function() == other.cost_function();
        let same_parameters = match (self.weights(), other.weights()) {
            (Some(a), Some(b)) => a.approx_eq_with(b, delta),
            (None, None) => true,
            _ => false,
        } && match (self.biases(), other.biases()) {
            (Some(a), Some(b)) => a.approx_eq_with(b, delta),
            (None, None) => true,
            _ => false,
        };
        same_structure && same_parameters
    }

    /// [`Layer::approx_eq_with`] using the default delta.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_with(other, crate::approx::F32_DEFAULT_DELTA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecKind {
    FullyConnected { neurons: usize },
    Convolutional { kernel_height: usize, kernel_width: usize, kernels: usize },
    Pooling,
    Output { neurons: usize, cost: CostFunctionType },
}

/// Description of a layer before its input shape is known.
///
/// ```rust
/// use neural_cpu::functions::{ActivationType, CostFunctionType};
/// use neural_cpu::layers::{LayerSpec, WeightsInitialization};
///
/// let hidden = LayerSpec::fully_connected(100, ActivationType::ReLU)
///     .with_weights_initialization(WeightsInitialization::HeUniform);
/// let out = LayerSpec::output(10, ActivationType::Sigmoid, CostFunctionType::CrossEntropy);
/// # let _ = (hidden, out);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    kind: SpecKind,
    activation: ActivationType,
    weights: WeightsInitialization,
    biases: BiasInitialization,
}

impl LayerSpec {
    const fn new(kind: SpecKind, activation: ActivationType) -> Self {
        Self {
            kind,
            activation,
            weights: WeightsInitialization::GlorotUniform,
            biases: BiasInitialization::Zero,
        }
    }

    /// A dense hidden layer with `neurons` outputs.
    #[must_use]
    pub const fn fully_connected(neurons: usize, activation: ActivationType) -> Self {
        Self::new(SpecKind::FullyConnected { neurons }, activation)
    }

    /// A convolution with `kernels` kernels of `kernel_height × kernel_width`.
    #[must_use]
    pub const fn convolutional(
        kernel_height: usize,
        kernel_width: usize,
        kernels: usize,
        activation: ActivationType,
    ) -> Self {
        Self::new(
            SpecKind::Convolutional {
                kernel_height,
                kernel_width,
                kernels,
            },
            activation,
        )
    }

    /// A 2×2 max pooling layer.
    #[must_use]
    pub const fn pooling(activation: ActivationType) -> Self {
        Self::new(SpecKind::Pooling, activation)
    }

    /// The terminal layer.
    #[must_use]
    pub const fn output(neurons: usize, activation: ActivationType, cost: CostFunctionType) -> Self {
        Self::new(SpecKind::Output { neurons, cost }, activation)
    }

    /// A softmax output layer trained with the log-likelihood cost.
    #[must_use]
    pub const fn softmax(neurons: usize) -> Self {
        Self::output(neurons, ActivationType::Softmax, CostFunctionType::LogLikelihood)
    }

    /// Overrides the weights initialization.
    #[must_use]
    pub const fn with_weights_initialization(mut self, mode: WeightsInitialization) -> Self {
        self.weights = mode;
        self
    }

    /// Overrides the biases initialization.
    #[must_use]
    pub const fn with_bias_initialization(mut self, mode: BiasInitialization) -> Self {
        self.biases = mode;
        self
    }

    /// The kind of layer this spec builds.
    #[must_use]
    pub const fn kind(&self) -> LayerKind {
        match self.kind {
            SpecKind::FullyConnected { .. } => LayerKind::FullyConnected,
            SpecKind::Convolutional { .. } => LayerKind::Convolutional,
            SpecKind::Pooling => LayerKind::Pooling,
            SpecKind::Output { .. } => LayerKind::Output,
        }
    }

    /// Resolves the layer against its input shape, drawing the parameters from `rng`.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] for empty layers or a softmax
    /// hidden layer, and a shape error when a convolution doesn't fit `input`.
    pub fn build(&self, input: TensorInfo, rng: &mut StdRng) -> Result<Layer> {
        if input.size() == 0 {
            return Err(NetworkError::InvalidArgument(format!(
                "cannot build a {} layer over an empty {input} input",
                self.kind()
            )));
        }
        match self.kind {
            SpecKind::FullyConnected { neurons } => {
                check_neurons(neurons)?;
                check_hidden_activation(self.activation)?;
                let weights = self.weights.weights(input.size(), neurons, input.size(), neurons, rng)?;
                let biases = self.biases.biases(neurons, rng)?;
                FullyConnectedLayer::from_parts(input, weights, biases, self.activation)
                    .map(Layer::FullyConnected)
            }
            SpecKind::Convolutional {
                kernel_height,
                kernel_width,
                kernels,
            } => {
                if kernels == 0 {
                    return Err(NetworkError::InvalidArgument(
                        "a convolutional layer needs at least one kernel".into(),
                    ));
                }
                check_hidden_activation(self.activation)?;
                let kernels_info = TensorInfo::new(kernel_height, kernel_width, input.channels);
                let area = kernel_height * kernel_width;
                let weights = self.weights.weights(
                    kernels,
                    kernels_info.size(),
                    kernels_info.size(),
                    kernels * area,
                    rng,
                )?;
                let biases = self.biases.biases(kernels, rng)?;
                ConvolutionalLayer::from_parts(input, kernels_info, weights, biases, self.activation)
                    .map(Layer::Convolutional)
            }
            SpecKind::Pooling => PoolingLayer::new(input, self.activation).map(Layer::Pooling),
            SpecKind::Output { neurons, cost } => {
                check_neurons(neurons)?;
                let weights = self.weights.weights(input.size(), neurons, input.size(), neurons, rng)?;
                let biases = self.biases.biases(neurons, rng)?;
                OutputLayer::from_parts(input, weights, biases, self.activation, cost).map(Layer::Output)
            }
        }
    }
}

fn check_neurons(neurons: usize) -> Result<()> {
    if neurons == 0 {
        return Err(NetworkError::InvalidArgument(
            "a dense layer needs at least one neuron".into(),
        ));
    }
    Ok(())
}
