//! Dense matrix and vector kernels.
//!
//! Every kernel allocates its output and partitions the work by output row with
//! `par_chunks_mut`, so no two tasks ever write the same value and there is no
//! cross-row reduction: results don't depend on the number of threads.

use crate::error::{NetworkError, Result};
use crate::functions::{ActivationType, softmax_row};
use crate::tensors::{Tensor, TensorView};
use rayon::prelude::*;

/// How [`sum`] combines its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumMode {
    /// Both operands have the same shape.
    Elementwise,
    /// The second operand is a `1 × cols` row added to every row of the first.
    ColumnBroadcast,
}

fn check_same_shape(operation: &'static str, a: TensorView<'_>, b: TensorView<'_>) -> Result<()> {
    if a.entities() != b.entities() || a.length() != b.length() {
        return Err(NetworkError::shape_mismatch(
            operation,
            a.shape_string(),
            b.shape_string(),
        ));
    }
    Ok(())
}

fn check_bias(operation: &'static str, bias: TensorView<'_>, width: usize) -> Result<()> {
    if bias.data().len() != width {
        return Err(NetworkError::shape_mismatch(
            operation,
            format!("a bias of {width} values"),
            format!("{} values", bias.data().len()),
        ));
    }
    Ok(())
}

fn check_product(operation: &'static str, inner_a: usize, inner_b: usize) -> Result<()> {
    if inner_a != inner_b {
        return Err(NetworkError::shape_mismatch(
            operation,
            format!("inner dimension {inner_a}"),
            format!("inner dimension {inner_b}"),
        ));
    }
    Ok(())
}

/// Writes `a_row · B` into `out`, `B` being `l × w` row-major.
#[inline]
fn row_times_matrix(a_row: &[f32], b: &[f32], w: usize, out: &mut [f32]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    for (k, &a) in a_row.iter().enumerate() {
        let b_row = &b[k * w..(k + 1) * w];
        for (o, &b) in out.iter_mut().zip(b_row) {
            *o += a * b;
        }
    }
}

/// Matrix multiplication `C = A × B` with `A: h×l` and `B: l×w`.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when `A.cols != B.rows`.
pub fn multiply(a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
    check_product("multiply", a.length(), b.entities())?;
    let (h, w) = (a.entities(), b.length());
    let mut c = Tensor::new(h, w);
    if w == 0 {
        return Ok(c);
    }
    let (a_data, b_data, l) = (a.data(), b.data(), a.length());
    c.data_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(i, row)| row_times_matrix(&a_data[i * l..(i + 1) * l], b_data, w, row));
    Ok(c)
}

/// `A × B + bias`, the bias row being added to every output row.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] on incompatible operands.
pub fn multiply_with_sum(a: TensorView<'_>, b: TensorView<'_>, bias: TensorView<'_>) -> Result<Tensor> {
    check_product("multiply_with_sum", a.length(), b.entities())?;
    check_bias("multiply_with_sum", bias, b.length())?;
    let (h, w, l) = (a.entities(), b.length(), a.length());
    let mut c = Tensor::new(h, w);
    if w == 0 {
        return Ok(c);
    }
    let (a_data, b_data, bias) = (a.data(), b.data(), bias.data());
    c.data_mut().par_chunks_mut(w).enumerate().for_each(|(i, row)| {
        row_times_matrix(&a_data[i * l..(i + 1) * l], b_data, w, row);
        row.iter_mut().zip(bias).for_each(|(v, &b)| *v += b);
    });
    Ok(c)
}

/// `f(A × B + bias)` computed in a single pass per output row.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] on incompatible operands.
pub fn multiply_with_sum_and_activation(
    a: TensorView<'_>,
    b: TensorView<'_>,
    bias: TensorView<'_>,
    activation: ActivationType,
) -> Result<Tensor> {
    check_product("multiply_with_sum_and_activation", a.length(), b.entities())?;
    check_bias("multiply_with_sum_and_activation", bias, b.length())?;
    let (h, w, l) = (a.entities(), b.length(), a.length());
    let mut c = Tensor::new(h, w);
    if w == 0 {
        return Ok(c);
    }
    let (a_data, b_data, bias) = (a.data(), b.data(), bias.data());
    c.data_mut().par_chunks_mut(w).enumerate().for_each(|(i, row)| {
        row_times_matrix(&a_data[i * l..(i + 1) * l], b_data, w, row);
        row.iter_mut().zip(bias).for_each(|(v, &b)| *v += b);
        activate_row(row, activation);
    });
    Ok(c)
}

/// `Aᵗ × B` with `A: l×h` and `B: l×w`, without materializing `Aᵗ`.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when `A.rows != B.rows`.
pub fn transpose_and_multiply(a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
    check_product("transpose_and_multiply", a.entities(), b.entities())?;
    let (l, h, w) = (a.entities(), a.length(), b.length());
    let mut c = Tensor::new(h, w);
    if w == 0 {
        return Ok(c);
    }
    let (a_data, b_data) = (a.data(), b.data());
    c.data_mut().par_chunks_mut(w).enumerate().for_each(|(i, row)| {
        for k in 0..l {
            let a = a_data[k * h + i];
            if a == 0.0 {
                continue;
            }
            let b_row = &b_data[k * w..(k + 1) * w];
            for (o, &b) in row.iter_mut().zip(b_row) {
                *o += a * b;
            }
        }
    });
    Ok(c)
}

/// `A × Bᵗ` with `A: h×l` and `B: w×l`, without materializing `Bᵗ`.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when `A.cols != B.cols`.
pub fn multiply_by_transposed(a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
    check_product("multiply_by_transposed", a.length(), b.length())?;
    let (h, l, w) = (a.entities(), a.length(), b.entities());
    let mut c = Tensor::new(h, w);
    if w == 0 {
        return Ok(c);
    }
    let (a_data, b_data) = (a.data(), b.data());
    c.data_mut().par_chunks_mut(w).enumerate().for_each(|(i, row)| {
        let a_row = &a_data[i * l..(i + 1) * l];
        for (j, o) in row.iter_mut().enumerate() {
            let b_row = &b_data[j * l..(j + 1) * l];
            *o = a_row.iter().zip(b_row).map(|(&a, &b)| a * b).sum();
        }
    });
    Ok(c)
}

/// Transposes an `h × w` matrix into `w × h`.
pub fn transpose(m: TensorView<'_>) -> Tensor {
    let (h, w) = (m.entities(), m.length());
    let mut t = Tensor::new(w, h);
    if h == 0 {
        return t;
    }
    let data = m.data();
    t.data_mut().par_chunks_mut(h).enumerate().for_each(|(j, row)| {
        for (i, v) in row.iter_mut().enumerate() {
            *v = data[i * w + j];
        }
    });
    t
}

#[inline]
fn activate_row(row: &mut [f32], activation: ActivationType) {
    if activation == ActivationType::Softmax {
        let copy = row.to_vec();
        softmax_row(&copy, row);
    } else {
        row.iter_mut().for_each(|v| *v = activation.activate(*v));
    }
}

/// Applies `f` to every value (row-wise for softmax).
pub fn activation(m: TensorView<'_>, activation: ActivationType) -> Tensor {
    let mut out = m.to_tensor();
    activation_in_place(&mut out, activation);
    out
}

/// In-place variant of [`activation`].
pub fn activation_in_place(m: &mut Tensor, activation: ActivationType) {
    let w = m.length();
    if w == 0 {
        return;
    }
    m.data_mut()
        .par_chunks_mut(w)
        .for_each(|row| activate_row(row, activation));
}

/// `δ ⊙= f'(z)`.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when the shapes differ, and
/// [`NetworkError::InvalidArgument`] for softmax.
pub fn activation_prime_in_place(delta: &mut Tensor, z: TensorView<'_>, activation: ActivationType) -> Result<()> {
    check_same_shape("activation_prime_in_place", delta.view(), z)?;
    if !activation.is_elementwise() {
        return Err(ActivationType::softmax_derivative_error());
    }
    delta
        .data_mut()
        .par_iter_mut()
        .zip(z.data().par_iter())
        .try_for_each(|(d, &z)| {
            *d *= activation.derivative(z)?;
            Ok(())
        })
}

/// Elementwise product of two tensors with the same shape.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when the shapes differ.
pub fn hadamard_product(a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
    check_same_shape("hadamard_product", a, b)?;
    let mut out = Tensor::new(a.entities(), a.length());
    out.data_mut()
        .par_iter_mut()
        .zip(a.data().par_iter().zip(b.data().par_iter()))
        .for_each(|(o, (&a, &b))| *o = a * b);
    Ok(out)
}

/// In-place elementwise product.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when the shapes differ.
pub fn hadamard_product_in_place(a: &mut Tensor, b: TensorView<'_>) -> Result<()> {
    check_same_shape("hadamard_product_in_place", a.view(), b)?;
    a.data_mut()
        .par_iter_mut()
        .zip(b.data().par_iter())
        .for_each(|(a, &b)| *a *= b);
    Ok(())
}

/// `A − B` elementwise.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when the shapes differ.
pub fn subtract(a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
    check_same_shape("subtract", a, b)?;
    let mut out = Tensor::new(a.entities(), a.length());
    out.data_mut()
        .par_iter_mut()
        .zip(a.data().par_iter().zip(b.data().par_iter()))
        .for_each(|(o, (&a, &b))| *o = a - b);
    Ok(out)
}

/// `A + B`, either elementwise or broadcasting `B` as a row vector.
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when `B` doesn't fit the mode.
pub fn sum(a: TensorView<'_>, b: TensorView<'_>, mode: SumMode) -> Result<Tensor> {
    let mut out = a.to_tensor();
    sum_in_place(&mut out, b, mode)?;
    Ok(out)
}

/// In-place variant of [`sum`].
///
/// # Errors
/// Returns [`NetworkError::ShapeMismatch`] when `B` doesn't fit the mode.
pub fn sum_in_place(a: &mut Tensor, b: TensorView<'_>, mode: SumMode) -> Result<()> {
    match mode {
        SumMode::Elementwise => {
            check_same_shape("sum", a.view(), b)?;
            a.data_mut()
                .par_iter_mut()
                .zip(b.data().par_iter())
                .for_each(|(a, &b)| *a += b);
        }
        SumMode::ColumnBroadcast => {
            if b.entities() != 1 || b.length() != a.length() {
                return Err(NetworkError::shape_mismatch(
                    "sum",
                    format!("1x{}", a.length()),
                    b.shape_string(),
                ));
            }
            let w = a.length();
            if w == 0 {
                return Ok(());
            }
            let bias = b.data();
            a.data_mut().par_chunks_mut(w).for_each(|row| {
                row.iter_mut().zip(bias).for_each(|(v, &b)| *v += b);
            });
        }
    }
    Ok(())
}

/// Column-wise sum of an `h × w` matrix into a `1 × w` row.
pub fn compress_vertically(m: TensorView<'_>) -> Tensor {
    let (h, w) = (m.entities(), m.length());
    let data = m.data();
    let mut out = Tensor::new(1, w);
    out.data_mut().par_iter_mut().enumerate().for_each(|(j, v)| {
        *v = (0..h).map(|i| data[i * w + j]).sum();
    });
    out
}

/// Index of the largest value, the first one on ties. Empty input yields 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
