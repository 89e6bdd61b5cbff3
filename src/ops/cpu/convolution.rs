//! Convolution kernels over volumes flattened as `samples × (depth·height·width)`.
//!
//! Kernels are stored as `kernels × (depth·kh·kw)`, channel-major like the
//! volumes they slide over. Every kernel writes disjoint 2D output slices in
//! parallel, one task per (sample, output channel) pair.

use crate::error::{NetworkError, Result};
use crate::tensors::{Tensor, TensorInfo, TensorView};
use rayon::prelude::*;

fn check_volume(operation: &'static str, volume: TensorView<'_>, info: TensorInfo) -> Result<()> {
    if info.size() == 0 {
        return Err(NetworkError::invalid_shape(operation, format!("empty volume {info}")));
    }
    if volume.length() != info.size() {
        return Err(NetworkError::shape_mismatch(
            operation,
            format!("rows of {} values ({info})", info.size()),
            format!("rows of {} values", volume.length()),
        ));
    }
    Ok(())
}

fn check_kernels(
    operation: &'static str,
    kernels: TensorView<'_>,
    kernels_info: TensorInfo,
    input_depth: usize,
    input_height: usize,
    input_width: usize,
) -> Result<()> {
    check_volume(operation, kernels, kernels_info)?;
    if kernels_info.channels != input_depth {
        return Err(NetworkError::shape_mismatch(
            operation,
            format!("kernel depth {input_depth}"),
            format!("kernel depth {}", kernels_info.channels),
        ));
    }
    if kernels_info.height < 2 || kernels_info.width < 2 {
        return Err(NetworkError::invalid_shape(
            operation,
            format!("kernels must be at least 2x2, got {}x{}", kernels_info.height, kernels_info.width),
        ));
    }
    if kernels_info.height > input_height || kernels_info.width > input_width {
        return Err(NetworkError::invalid_shape(
            operation,
            format!(
                "kernel {}x{} is larger than the {input_height}x{input_width} input",
                kernels_info.height, kernels_info.width
            ),
        ));
    }
    Ok(())
}

/// Output shape of a valid convolution of `source_info` with `kernels` kernels
/// of shape `kernels_info`.
pub const fn convolution_output_info(source_info: TensorInfo, kernels_info: TensorInfo, kernels: usize) -> TensorInfo {
    TensorInfo::new(
        source_info.height - kernels_info.height + 1,
        source_info.width - kernels_info.width + 1,
        kernels,
    )
}

/// Forward valid cross-correlation: each output channel is the sum over the
/// input channels of the source slice correlated with the matching kernel
/// slice, plus the kernel bias.
///
/// # Errors
/// Returns a shape error when the kernel depth differs from the source depth,
/// when kernels are smaller than 2×2 or larger than the source, or when the
/// bias count differs from the kernel count.
pub fn convolute_forward(
    source: TensorView<'_>,
    source_info: TensorInfo,
    kernels: TensorView<'_>,
    kernels_info: TensorInfo,
    biases: TensorView<'_>,
) -> Result<Tensor> {
    check_volume("convolute_forward", source, source_info)?;
    check_kernels(
        "convolute_forward",
        kernels,
        kernels_info,
        source_info.channels,
        source_info.height,
        source_info.width,
    )?;
    let count = kernels.entities();
    if biases.data().len() != count {
        return Err(NetworkError::shape_mismatch(
            "convolute_forward",
            format!("{count} biases"),
            format!("{} biases", biases.data().len()),
        ));
    }
    let out_info = convolution_output_info(source_info, kernels_info, count);
    let (h, w, depth) = (source_info.height, source_info.width, source_info.channels);
    let (kh, kw) = (kernels_info.height, kernels_info.width);
    let (oh, ow) = (out_info.height, out_info.width);
    let (src, ker, bias) = (source.data(), kernels.data(), biases.data());

    let mut result = Tensor::new(source.entities(), out_info.size());
    result
        .data_mut()
        .par_chunks_mut(out_info.slice_size())
        .enumerate()
        .for_each(|(index, slice)| {
            let (n, k) = (index / count, index % count);
            let sample = &src[n * source_info.size()..(n + 1) * source_info.size()];
            let kernel = &ker[k * kernels_info.size()..(k + 1) * kernels_info.size()];
            for y in 0..oh {
                for x in 0..ow {
                    let mut acc = bias[k];
                    for d in 0..depth {
                        let s = &sample[d * h * w..(d + 1) * h * w];
                        let kk = &kernel[d * kh * kw..(d + 1) * kh * kw];
                        for i in 0..kh {
                            let s_row = &s[(y + i) * w + x..(y + i) * w + x + kw];
                            let k_row = &kk[i * kw..(i + 1) * kw];
                            acc += s_row.iter().zip(k_row).map(|(&a, &b)| a * b).sum::<f32>();
                        }
                    }
                    slice[y * ow + x] = acc;
                }
            }
        });
    Ok(result)
}

/// Full convolution propagating `delta` back through the kernels.
///
/// `kernels` must already be rotated by 180° (see [`rotate180`]); each output
/// channel `d` is the sum over the delta channels `k` of the zero-padded
/// delta slice correlated with slice `d` of kernel `k`. The output spatial size
/// is `delta + kernel − 1`.
///
/// # Errors
/// Returns a shape error when the kernel count differs from the delta depth.
pub fn convolute_backwards(
    delta: TensorView<'_>,
    delta_info: TensorInfo,
    kernels: TensorView<'_>,
    kernels_info: TensorInfo,
) -> Result<Tensor> {
    check_volume("convolute_backwards", delta, delta_info)?;
    check_volume("convolute_backwards", kernels, kernels_info)?;
    if kernels.entities() != delta_info.channels {
        return Err(NetworkError::shape_mismatch(
            "convolute_backwards",
            format!("{} kernels", delta_info.channels),
            format!("{} kernels", kernels.entities()),
        ));
    }
    if kernels_info.height < 2 || kernels_info.width < 2 {
        return Err(NetworkError::invalid_shape(
            "convolute_backwards",
            format!("kernels must be at least 2x2, got {}x{}", kernels_info.height, kernels_info.width),
        ));
    }
    let (dh, dw, count) = (delta_info.height, delta_info.width, delta_info.channels);
    let (kh, kw, depth) = (kernels_info.height, kernels_info.width, kernels_info.channels);
    let out_info = TensorInfo::new(dh + kh - 1, dw + kw - 1, depth);
    let (oh, ow) = (out_info.height, out_info.width);
    let (dat, ker) = (delta.data(), kernels.data());

    let mut result = Tensor::new(delta.entities(), out_info.size());
    result
        .data_mut()
        .par_chunks_mut(out_info.slice_size())
        .enumerate()
        .for_each(|(index, slice)| {
            let (n, d) = (index / depth, index % depth);
            let sample = &dat[n * delta_info.size()..(n + 1) * delta_info.size()];
            for y in 0..oh {
                for x in 0..ow {
                    let mut acc = 0.0;
                    for k in 0..count {
                        let ds = &sample[k * dh * dw..(k + 1) * dh * dw];
                        let kk = &ker[k * kernels_info.size() + d * kh * kw..][..kh * kw];
                        for i in 0..kh {
                            // delta row index: y + i - (kh - 1)
                            let Some(dy) = (y + i).checked_sub(kh - 1) else {
                                continue;
                            };
                            if dy >= dh {
                                continue;
                            }
                            for j in 0..kw {
                                let Some(dx) = (x + j).checked_sub(kw - 1) else {
                                    continue;
                                };
                                if dx >= dw {
                                    continue;
                                }
                                acc += ds[dy * dw + dx] * kk[i * kw + j];
                            }
                        }
                    }
                    slice[y * ow + x] = acc;
                }
            }
        });
    Ok(result)
}

/// Weight gradient of a convolution: valid cross-correlation of every source
/// channel with every delta channel, summed over the samples.
///
/// The result is `delta_depth × (source_depth·kh·kw)` where
/// `kh = source_height − delta_height + 1`. Samples are reduced sequentially
/// inside a task, one task per kernel slice.
///
/// # Errors
/// Returns a shape error when the sample counts differ or the delta is
/// larger than the source.
pub fn convolute_gradient(
    source: TensorView<'_>,
    source_info: TensorInfo,
    delta: TensorView<'_>,
    delta_info: TensorInfo,
) -> Result<Tensor> {
    check_volume("convolute_gradient", source, source_info)?;
    check_volume("convolute_gradient", delta, delta_info)?;
    if source.entities() != delta.entities() {
        return Err(NetworkError::shape_mismatch(
            "convolute_gradient",
            format!("{} samples", source.entities()),
            format!("{} samples", delta.entities()),
        ));
    }
    if delta_info.height > source_info.height || delta_info.width > source_info.width {
        return Err(NetworkError::invalid_shape(
            "convolute_gradient",
            format!("delta {delta_info} is larger than the source {source_info}"),
        ));
    }
    let (h, w, depth) = (source_info.height, source_info.width, source_info.channels);
    let (dh, dw) = (delta_info.height, delta_info.width);
    let (kh, kw) = (h - dh + 1, w - dw + 1);
    let kernels_info = TensorInfo::new(kh, kw, depth);
    let (src, dat) = (source.data(), delta.data());
    let samples = source.entities();

    let mut result = Tensor::new(delta_info.channels, kernels_info.size());
    result
        .data_mut()
        .par_chunks_mut(kh * kw)
        .enumerate()
        .for_each(|(index, slice)| {
            let (k, d) = (index / depth, index % depth);
            for n in 0..samples {
                let s = &src[n * source_info.size() + d * h * w..][..h * w];
                let ds = &dat[n * delta_info.size() + k * dh * dw..][..dh * dw];
                for i in 0..kh {
                    for j in 0..kw {
                        let mut acc = 0.0;
                        for y in 0..dh {
                            let s_row = &s[(y + i) * w + j..(y + i) * w + j + dw];
                            let d_row = &ds[y * dw..(y + 1) * dw];
                            acc += s_row.iter().zip(d_row).map(|(&a, &b)| a * b).sum::<f32>();
                        }
                        slice[i * kw + j] += acc;
                    }
                }
            }
        });
    Ok(result)
}

/// Sums every channel of `delta` over all the samples and positions, producing
/// a `1 × channels` row (the convolution bias gradient).
///
/// # Errors
/// Returns a shape error when `delta` doesn't match `info`.
pub fn compress_spatial(delta: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
    check_volume("compress_spatial", delta, info)?;
    let data = delta.data();
    let slice = info.slice_size();
    let mut out = Tensor::new(1, info.channels);
    out.data_mut().par_iter_mut().enumerate().for_each(|(c, v)| {
        *v = (0..delta.entities())
            .map(|n| {
                data[n * info.size() + c * slice..][..slice]
                    .iter()
                    .sum::<f32>()
            })
            .sum();
    });
    Ok(out)
}

/// Rotates every 2D slice of every row by 180°.
///
/// # Errors
/// Returns a shape error when `source` doesn't match `info`.
pub fn rotate180(source: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
    check_volume("rotate180", source, info)?;
    let slice = info.slice_size();
    let data = source.data();
    let mut out = Tensor::new(source.entities(), source.length());
    out.data_mut()
        .par_chunks_mut(slice)
        .enumerate()
        .for_each(|(index, target)| {
            let origin = &data[index * slice..(index + 1) * slice];
            for (t, &o) in target.iter_mut().zip(origin.iter().rev()) {
                *t = o;
            }
        });
    Ok(out)
}
