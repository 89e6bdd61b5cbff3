use super::{Backpropagation, check_hidden_activation};
use crate::backend::Backend;
use crate::error::Result;
use crate::functions::ActivationType;
use crate::ops::cpu::pooled_info;
use crate::tensors::{Tensor, TensorInfo, TensorView};

/// A 2×2 max pooling layer. It holds no parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolingLayer {
    input: TensorInfo,
    activation: ActivationType,
}

impl PoolingLayer {
    /// Creates a pooling layer over `input` volumes.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`](crate::NetworkError::InvalidArgument)
    /// for a softmax activation.
    pub fn new(input: TensorInfo, activation: ActivationType) -> Result<Self> {
        check_hidden_activation(activation)?;
        Ok(Self { input, activation })
    }

    /// Shape of one input sample.
    #[must_use]
    pub const fn input_info(&self) -> TensorInfo {
        self.input
    }

    /// Shape of one output sample.
    #[must_use]
    pub const fn output_info(&self) -> TensorInfo {
        pooled_info(self.input)
    }

    /// Nonlinearity applied after pooling.
    #[must_use]
    pub const fn activation(&self) -> ActivationType {
        self.activation
    }

    pub(super) fn forward(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<(Tensor, Tensor)> {
        let z = backend.pool2x2(x, self.input)?;
        let a = backend.activation(z.view(), self.activation)?;
        Ok((z, a))
    }

    pub(super) fn backpropagate(
        &self,
        backend: &dyn Backend,
        x: TensorView<'_>,
        delta: TensorView<'_>,
        needs_input_gradient: bool,
    ) -> Result<Backpropagation> {
        let input_gradient = if needs_input_gradient {
            Some(backend.upscale_pool2x2(x, self.input, delta)?)
        } else {
            None
        };
        Ok(Backpropagation {
            input_gradient,
            gradient: None,
        })
    }
}
