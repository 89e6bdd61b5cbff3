//! 2×2 max pooling and its backward routing.

use crate::error::{NetworkError, Result};
use crate::tensors::{Tensor, TensorInfo, TensorView};
use rayon::prelude::*;

/// Output shape of a 2×2 pooling over `info`.
pub const fn pooled_info(info: TensorInfo) -> TensorInfo {
    TensorInfo::new(info.height.div_ceil(2), info.width.div_ceil(2), info.channels)
}

fn check_source(operation: &'static str, source: TensorView<'_>, info: TensorInfo) -> Result<()> {
    if info.size() == 0 {
        return Err(NetworkError::invalid_shape(operation, format!("empty volume {info}")));
    }
    if source.length() != info.size() {
        return Err(NetworkError::shape_mismatch(
            operation,
            format!("rows of {} values ({info})", info.size()),
            format!("rows of {} values", source.length()),
        ));
    }
    Ok(())
}

/// Position of the first maximum in the window anchored at `(2y, 2x)`.
///
/// Windows on an odd trailing row or column shrink to the values present.
fn window_argmax(slice: &[f32], h: usize, w: usize, y: usize, x: usize) -> usize {
    let (y0, x0) = (2 * y, 2 * x);
    let mut best = y0 * w + x0;
    for i in y0..(y0 + 2).min(h) {
        for j in x0..(x0 + 2).min(w) {
            let index = i * w + j;
            if slice[index] > slice[best] {
                best = index;
            }
        }
    }
    best
}

/// 2×2 max pooling of every channel, output `ceil(h/2) × ceil(w/2)`.
///
/// # Errors
/// Returns a shape error when `source` doesn't match `info`.
pub fn pool2x2(source: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
    check_source("pool2x2", source, info)?;
    let out_info = pooled_info(info);
    let (h, w, depth) = (info.height, info.width, info.channels);
    let (oh, ow) = (out_info.height, out_info.width);
    let data = source.data();

    let mut result = Tensor::new(source.entities(), out_info.size());
    result
        .data_mut()
        .par_chunks_mut(out_info.slice_size())
        .enumerate()
        .for_each(|(index, slice)| {
            let (n, d) = (index / depth, index % depth);
            let s = &data[n * info.size() + d * h * w..][..h * w];
            for y in 0..oh {
                for x in 0..ow {
                    slice[y * ow + x] = s[window_argmax(s, h, w, y, x)];
                }
            }
        });
    Ok(result)
}

/// Routes each value of `pooled` back to the location of the maximum of its
/// window in `source`, leaving every other position at zero.
///
/// # Errors
/// Returns a shape error when `pooled` is not the pooled shape of `source`.
pub fn upscale_pool2x2(source: TensorView<'_>, info: TensorInfo, pooled: TensorView<'_>) -> Result<Tensor> {
    check_source("upscale_pool2x2", source, info)?;
    let out_info = pooled_info(info);
    if pooled.entities() != source.entities() || pooled.length() != out_info.size() {
        return Err(NetworkError::shape_mismatch(
            "upscale_pool2x2",
            format!("{}x{}", source.entities(), out_info.size()),
            pooled.shape_string(),
        ));
    }
    let (h, w, depth) = (info.height, info.width, info.channels);
    let (oh, ow) = (out_info.height, out_info.width);
    let (data, values) = (source.data(), pooled.data());

    let mut result = Tensor::new(source.entities(), info.size());
    result
        .data_mut()
        .par_chunks_mut(h * w)
        .enumerate()
        .for_each(|(index, slice)| {
            let (n, d) = (index / depth, index % depth);
            let s = &data[n * info.size() + d * h * w..][..h * w];
            let p = &values[n * out_info.size() + d * oh * ow..][..oh * ow];
            for y in 0..oh {
                for x in 0..ow {
                    slice[window_argmax(s, h, w, y, x)] = p[y * ow + x];
                }
            }
        });
    Ok(result)
}
