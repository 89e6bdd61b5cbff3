use crate::error::Result;
use crate::network::{Evaluation, Network};
use crate::tensors::{SamplesBatch, Tensor};

/// A held-out set of samples used for validation or testing.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: SamplesBatch,
}

impl Dataset {
    /// Pairs inputs and expected outputs, one sample per row.
    ///
    /// # Errors
    /// Returns [`crate::NetworkError::ShapeMismatch`] if the row counts differ.
    pub fn new(x: Tensor, y: Tensor) -> Result<Self> {
        Ok(Self {
            samples: SamplesBatch::new(x, y)?,
        })
    }

    /// Builds a dataset out of per-sample slices.
    ///
    /// # Errors
    /// Returns [`crate::NetworkError::ShapeMismatch`] for ragged samples or
    /// mismatched counts.
    pub fn from_samples<X: AsRef<[f32]>, Y: AsRef<[f32]>>(x: &[X], y: &[Y]) -> Result<Self> {
        Self::new(Tensor::from_rows(x)?, Tensor::from_rows(y)?)
    }

    /// Inputs.
    #[must_use]
    pub const fn x(&self) -> &Tensor {
        &self.samples.x
    }

    /// Expected outputs.
    #[must_use]
    pub const fn y(&self) -> &Tensor {
        &self.samples.y
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average cost and accuracy of `network` on this dataset.
    ///
    /// # Errors
    /// Returns a shape error if the samples don't match the network.
    pub fn evaluate(&self, network: &dyn Network) -> Result<Evaluation> {
        network.evaluate(self.samples.x.view(), self.samples.y.view())
    }
}

impl From<SamplesBatch> for Dataset {
    fn from(samples: SamplesBatch) -> Self {
        Self { samples }
    }
}
