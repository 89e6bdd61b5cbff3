use super::{Backpropagation, Gradient, check_hidden_activation};
use crate::backend::Backend;
use crate::error::{NetworkError, Result};
use crate::functions::ActivationType;
use crate::ops::cpu::convolution_output_info;
use crate::tensors::{Tensor, TensorInfo, TensorView};

/// A valid convolution layer.
///
/// Kernels are stored as `kernels × (depth·kh·kw)` with one bias per kernel;
/// the output depth is the kernel count.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionalLayer {
    input: TensorInfo,
    kernels_info: TensorInfo,
    kernels: Tensor,
    biases: Tensor,
    activation: ActivationType,
}

impl ConvolutionalLayer {
    /// Assembles a layer from existing kernels.
    ///
    /// # Errors
    /// Returns a shape error when the kernels don't fit the input volume and
    /// [`NetworkError::InvalidArgument`] for a softmax activation.
    pub fn from_parts(
        input: TensorInfo,
        kernels_info: TensorInfo,
        kernels: Tensor,
        biases: Tensor,
        activation: ActivationType,
    ) -> Result<Self> {
        check_hidden_activation(activation)?;
        if kernels_info.channels != input.channels {
            return Err(NetworkError::shape_mismatch(
                "ConvolutionalLayer",
                format!("kernel depth {}", input.channels),
                format!("kernel depth {}", kernels_info.channels),
            ));
        }
        if kernels_info.height < 2
            || kernels_info.width < 2
            || kernels_info.height > input.height
            || kernels_info.width > input.width
        {
            return Err(NetworkError::invalid_shape(
                "ConvolutionalLayer",
                format!(
                    "{}x{} kernels don't fit a {input} input",
                    kernels_info.height, kernels_info.width
                ),
            ));
        }
        if kernels.entities() == 0 || kernels.length() != kernels_info.size() {
            return Err(NetworkError::shape_mismatch(
                "ConvolutionalLayer",
                format!("kernels of {} values", kernels_info.size()),
                format!("{}x{} kernels", kernels.entities(), kernels.length()),
            ));
        }
        if biases.entities() != 1 || biases.length() != kernels.entities() {
            return Err(NetworkError::shape_mismatch(
                "ConvolutionalLayer",
                format!("1x{} biases", kernels.entities()),
                format!("{}x{} biases", biases.entities(), biases.length()),
            ));
        }
        Ok(Self {
            input,
            kernels_info,
            kernels,
            biases,
            activation,
        })
    }

    /// Shape of a single kernel (`kh × kw × depth`).
    #[must_use]
    pub const fn kernels_info(&self) -> TensorInfo {
        self.kernels_info
    }

    /// Number of kernels, which is the output depth.
    #[must_use]
    pub const fn kernels_count(&self) -> usize {
        self.kernels.entities()
    }

    /// Shape of one input sample.
    #[must_use]
    pub const fn input_info(&self) -> TensorInfo {
        self.input
    }

    /// Shape of one output sample.
    #[must_use]
    pub const fn output_info(&self) -> TensorInfo {
        convolution_output_info(self.input, self.kernels_info, self.kernels.entities())
    }

    /// Nonlinearity applied to the activity.
    #[must_use]
    pub const fn activation(&self) -> ActivationType {
        self.activation
    }

    /// The kernels tensor.
    #[must_use]
    pub const fn weights(&self) -> &Tensor {
        &self.kernels
    }

    /// One bias per kernel.
    #[must_use]
    pub const fn biases(&self) -> &Tensor {
        &self.biases
    }

    pub(super) fn parameters_mut(&mut self) -> (&mut Tensor, &mut Tensor) {
        (&mut self.kernels, &mut self.biases)
    }

    pub(super) fn forward(&self, backend: &dyn Backend, x: TensorView<'_>) -> Result<(Tensor, Tensor)> {
        let z = backend.convolute_forward(
            x,
            self.input,
            self.kernels.view(),
            self.kernels_info,
            self.biases.view(),
        )?;
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
        let output = self.output_info();
        let weights = backend.convolute_gradient(x, self.input, delta, output)?;
        let biases = backend.compress_spatial(delta, output)?;
        let input_gradient = if needs_input_gradient {
            let rotated = backend.rotate180(self.kernels.view(), self.kernels_info)?;
            Some(backend.convolute_backwards(delta, output, rotated.view(), self.kernels_info)?)
        } else {
            None
        };
        Ok(Backpropagation {
            input_gradient,
            gradient: Some(Gradient { weights, biases }),
        })
    }
}
