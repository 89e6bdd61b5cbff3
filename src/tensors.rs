//! Core tensor data structures.
//!
//! # Tensor buffers
//!
//! A [`Tensor`] is an owned, fixed-size, flat buffer of `f32` values logically
//! arranged as `entities × length` (one row per sample). Volumes such as images
//! or feature maps are flattened channel-major into a row and described by a
//! [`TensorInfo`].
//!
//! - Storage is released exactly once, when the owning `Tensor` is dropped.
//! - [`TensorView`] is the non-owning counterpart used to wrap caller memory
//!   without copying it.
//! - Content comparison uses a numeric tolerance (see [`crate::approx`]).
//!
//! ## Example
//!
//! ```rust
//! use neural_cpu::tensors::{Tensor, TensorView};
//!
//! let t = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! assert_eq!(t.row(1), &[4.0, 5.0, 6.0]);
//!
//! let raw = [0.5f32; 8];
//! let view = TensorView::reshape(&raw, 4, 2).unwrap();
//! assert_eq!(view.entities(), 4);
//! ```

use crate::approx::{self, F32_DEFAULT_DELTA};
use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity-agnostic shape of a single sample: `height × width × channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Height of each 2D slice.
    pub height: usize,
    /// Width of each 2D slice.
    pub width: usize,
    /// Number of stacked slices.
    pub channels: usize,
}

impl TensorInfo {
    /// Creates a volume shape.
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Shape of an RGB image.
    pub const fn image_rgb(height: usize, width: usize) -> Self {
        Self::new(height, width, 3)
    }

    /// Shape of a single-channel image.
    pub const fn image(height: usize, width: usize) -> Self {
        Self::new(height, width, 1)
    }

    /// Shape of a flat feature vector.
    pub const fn linear(size: usize) -> Self {
        Self::new(1, size, 1)
    }

    /// Number of values in a single 2D slice.
    pub const fn slice_size(&self) -> usize {
        self.height * self.width
    }

    /// Number of values in one sample.
    pub const fn size(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// [`size`](Self::size), or `None` when the product overflows `usize`.
    pub fn checked_size(&self) -> Option<usize> {
        self.height.checked_mul(self.width)?.checked_mul(self.channels)
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// An owned `entities × length` buffer of `f32` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    entities: usize,
    length: usize,
    data: Vec<f32>,
}

impl Tensor {
    /// Allocates a zeroed tensor.
    pub fn new(entities: usize, length: usize) -> Self {
        Self {
            entities,
            length,
            data: vec![0.0; entities * length],
        }
    }

    /// Allocates a tensor with every value set to `value`.
    pub fn filled(entities: usize, length: usize, value: f32) -> Self {
        Self {
            entities,
            length,
            data: vec![value; entities * length],
        }
    }

    /// Takes ownership of `data` as an `entities × length` tensor.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if `entities · length != data.len()`.
    pub fn from_vec(entities: usize, length: usize, data: Vec<f32>) -> Result<Self> {
        if entities * length != data.len() {
            return Err(NetworkError::shape_mismatch(
                "Tensor::from_vec",
                format!("{} values ({entities}x{length})", entities * length),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self {
            entities,
            length,
            data,
        })
    }

    /// Builds a tensor with one row per slice in `rows`.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if the rows are ragged.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let length = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * length);
        for row in rows {
            let row = row.as_ref();
            if row.len() != length {
                return Err(NetworkError::shape_mismatch(
                    "Tensor::from_rows",
                    format!("rows of {length} values"),
                    format!("a row of {} values", row.len()),
                ));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            entities: rows.len(),
            length,
            data,
        })
    }

    /// Number of rows.
    pub const fn entities(&self) -> usize {
        self.entities
    }

    /// Number of values per row.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Total number of values.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Flat row-major storage.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable flat row-major storage.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor, returning its storage.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Row `i`.
    ///
    /// # Panics
    /// Panics if `i >= entities`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.length..(i + 1) * self.length]
    }

    /// Mutable row `i`.
    ///
    /// # Panics
    /// Panics if `i >= entities`.
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.length..(i + 1) * self.length]
    }

    /// Borrows the tensor as a view.
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            entities: self.entities,
            length: self.length,
            data: &self.data,
        }
    }

    /// Reinterprets the storage with a new shape, without copying.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if the sizes differ.
    pub fn reshape(self, entities: usize, length: usize) -> Result<Self> {
        Self::from_vec(entities, length, self.data)
    }

    /// Whether every value is finite (no NaN, no infinity).
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Content comparison with the default delta.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_with(other, F32_DEFAULT_DELTA)
    }

    /// Content comparison with a custom absolute delta.
    pub fn approx_eq_with(&self, other: &Self, delta: f32) -> bool {
        self.entities == other.entities
            && self.length == other.length
            && approx::approx_eq_delta(&self.data[..], &other.data[..], delta)
    }
}

/// A non-owning `entities × length` view over caller-managed memory.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    entities: usize,
    length: usize,
    data: &'a [f32],
}

impl<'a> TensorView<'a> {
    /// Wraps `data` as an `entities × length` view.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if `entities · length != data.len()`.
    pub fn reshape(data: &'a [f32], entities: usize, length: usize) -> Result<Self> {
        if entities * length != data.len() {
            return Err(NetworkError::shape_mismatch(
                "TensorView::reshape",
                format!("{} values ({entities}x{length})", entities * length),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self {
            entities,
            length,
            data,
        })
    }

    /// Number of rows.
    pub const fn entities(&self) -> usize {
        self.entities
    }

    /// Number of values per row.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Flat row-major storage.
    pub const fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Row `i`.
    ///
    /// # Panics
    /// Panics if `i >= entities`.
    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.length..(i + 1) * self.length]
    }

    /// Copies the view into an owned tensor.
    pub fn to_tensor(&self) -> Tensor {
        Tensor {
            entities: self.entities,
            length: self.length,
            data: self.data.to_vec(),
        }
    }

    /// Describes the view as `entities x length`.
    pub fn shape_string(&self) -> String {
        format!("{}x{}", self.entities, self.length)
    }
}

impl<'a> From<&'a Tensor> for TensorView<'a> {
    fn from(tensor: &'a Tensor) -> Self {
        tensor.view()
    }
}

/// Paired inputs and expected outputs of a mini-batch.
#[derive(Debug, Clone)]
pub struct SamplesBatch {
    /// Inputs, one sample per row.
    pub x: Tensor,
    /// Expected outputs, one sample per row.
    pub y: Tensor,
}

impl SamplesBatch {
    /// Pairs two tensors with the same number of rows.
    ///
    /// # Errors
    /// Returns [`NetworkError::ShapeMismatch`] if the entity counts differ.
    pub fn new(x: Tensor, y: Tensor) -> Result<Self> {
        if x.entities() != y.entities() {
            return Err(NetworkError::shape_mismatch(
                "SamplesBatch::new",
                format!("{} expected outputs", x.entities()),
                format!("{} expected outputs", y.entities()),
            ));
        }
        Ok(Self { x, y })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.x.entities()
    }

    /// Whether the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.x.entities() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_mismatched_sizes() {
        assert!(Tensor::from_vec(2, 2, vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let rows = [vec![1.0, 2.0], vec![3.0]];
        assert!(Tensor::from_rows(&rows).is_err());
    }

    #[test]
    fn reshape_keeps_the_storage() {
        let t = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = t.reshape(3, 2).unwrap();
        assert_eq!(t.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn views_wrap_caller_memory() {
        let raw = vec![1.0f32, 2.0, 3.0, 4.0];
        let view = TensorView::reshape(&raw, 2, 2).unwrap();
        assert_eq!(view.row(1), &[3.0, 4.0]);
        assert!(TensorView::reshape(&raw, 3, 2).is_err());
    }

    #[test]
    fn approx_eq_tolerates_rounding() {
        let a = Tensor::from_vec(1, 2, vec![0.1, 0.2]).unwrap();
        let b = Tensor::from_vec(1, 2, vec![0.1 + 1e-7, 0.2]).unwrap();
        assert!(a.approx_eq(&b));
        let c = Tensor::from_vec(2, 1, vec![0.1, 0.2]).unwrap();
        assert!(!a.approx_eq(&c));
    }

    #[test]
    fn overflow_is_detected() {
        let mut t = Tensor::new(1, 3);
        assert!(t.is_finite());
        t.data_mut()[1] = f32::NAN;
        assert!(!t.is_finite());
    }

    #[test]
    fn tensor_info_sizes() {
        let info = TensorInfo::new(4, 5, 3);
        assert_eq!(info.slice_size(), 20);
        assert_eq!(info.size(), 60);
        assert_eq!(TensorInfo::linear(7).size(), 7);
        assert_eq!(info.to_string(), "4x5x3");
    }
}
