use crate::error::{NetworkError, Result};
use crate::tensors::{SamplesBatch, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// A training set split into mini-batches.
///
/// Samples are redistributed across batches by [`Self::shuffle`]; the last
/// batch holds the remainder when the sample count is not a multiple of the
/// batch size. The collection owns the seeded generator of the session, so
/// shuffling and dropout are reproducible.
#[derive(Debug, Clone)]
pub struct BatchesCollection {
    x: Tensor,
    y: Tensor,
    batch_size: usize,
    order: Vec<usize>,
    batches: Vec<SamplesBatch>,
    rng: StdRng,
}

impl BatchesCollection {
    /// Splits paired tensors into batches of `batch_size` samples.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] for a zero batch size and a
    /// shape error when the row counts differ.
    pub fn from_tensors(x: Tensor, y: Tensor, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(NetworkError::InvalidArgument("batch size must be at least 1".into()));
        }
        let samples = SamplesBatch::new(x, y)?;
        let mut collection = Self {
            order: (0..samples.len()).collect(),
            x: samples.x,
            y: samples.y,
            batch_size,
            batches: Vec::new(),
            rng: StdRng::seed_from_u64(0),
        };
        collection.rebuild();
        Ok(collection)
    }

    /// Same as [`Self::from_tensors`] for per-sample slices.
    ///
    /// # Errors
    /// See [`Self::from_tensors`]; ragged samples are rejected too.
    pub fn from_samples<X: AsRef<[f32]>, Y: AsRef<[f32]>>(x: &[X], y: &[Y], batch_size: usize) -> Result<Self> {
        Self::from_tensors(Tensor::from_rows(x)?, Tensor::from_rows(y)?, batch_size)
    }

    /// Reseeds the generator used for shuffling and dropout.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn rebuild(&mut self) {
        let (inputs, outputs) = (self.x.length(), self.y.length());
        self.batches = self
            .order
            .chunks(self.batch_size)
            .map(|indices| {
                let mut x = Tensor::new(indices.len(), inputs);
                let mut y = Tensor::new(indices.len(), outputs);
                for (row, &sample) in indices.iter().enumerate() {
                    x.row_mut(row).copy_from_slice(self.x.row(sample));
                    y.row_mut(row).copy_from_slice(self.y.row(sample));
                }
                SamplesBatch { x, y }
            })
            .collect();
    }

    /// Redistributes the samples randomly across batches.
    pub fn shuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.rebuild();
    }

    /// Every batch, in order.
    #[must_use]
    pub fn batches(&self) -> &[SamplesBatch] {
        &self.batches
    }

    pub(crate) fn batches_and_rng(&mut self) -> (&[SamplesBatch], &mut StdRng) {
        (&self.batches, &mut self.rng)
    }

    /// Number of batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Whether there are no samples at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of samples.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.order.len()
    }

    /// Width of an input sample.
    #[must_use]
    pub const fn input_length(&self) -> usize {
        self.x.length()
    }

    /// Width of an expected output.
    #[must_use]
    pub const fn output_length(&self) -> usize {
        self.y.length()
    }

    /// Nominal batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }
}
