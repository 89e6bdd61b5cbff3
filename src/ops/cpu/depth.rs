//! Channel slicing used by depth concatenation nodes.

use crate::error::{NetworkError, Result};
use crate::tensors::{Tensor, TensorInfo, TensorView};
use rayon::prelude::*;

/// Splits every row of `source` into consecutive channel groups of the given
/// `depths`, one tensor per group.
///
/// # Errors
/// Returns a shape error when the depths don't add up to `info.channels` or
/// when `source` doesn't match `info`.
pub fn split_depth(source: TensorView<'_>, info: TensorInfo, depths: &[usize]) -> Result<Vec<Tensor>> {
    if info.size() == 0 {
        return Err(NetworkError::invalid_shape("split_depth", format!("empty volume {info}")));
    }
    if source.length() != info.size() {
        return Err(NetworkError::shape_mismatch(
            "split_depth",
            format!("rows of {} values ({info})", info.size()),
            format!("rows of {} values", source.length()),
        ));
    }
    let total: usize = depths.iter().sum();
    if total != info.channels || depths.contains(&0) {
        return Err(NetworkError::invalid_shape(
            "split_depth",
            format!("depths {depths:?} do not partition {} channels", info.channels),
        ));
    }
    let slice = info.slice_size();
    let mut offset = 0;
    let parts = depths
        .iter()
        .map(|&depth| {
            let start = offset * slice;
            offset += depth;
            let length = depth * slice;
            let mut part = Tensor::new(source.entities(), length);
            part.data_mut()
                .par_chunks_mut(length)
                .enumerate()
                .for_each(|(n, row)| row.copy_from_slice(&source.row(n)[start..start + length]));
            part
        })
        .collect();
    Ok(parts)
}

/// Stacks the channels of every input, in order, into a single volume.
///
/// # Errors
/// Returns a shape error when the inputs disagree on sample count or spatial
/// size, or when the list is empty.
pub fn concatenate_depth(inputs: &[(TensorView<'_>, TensorInfo)]) -> Result<(Tensor, TensorInfo)> {
    let Some(&(first, first_info)) = inputs.first() else {
        return Err(NetworkError::invalid_shape("concatenate_depth", "no inputs"));
    };
    for &(view, info) in inputs {
        if info.size() == 0 {
            return Err(NetworkError::invalid_shape("concatenate_depth", format!("empty volume {info}")));
        }
        if view.length() != info.size() {
            return Err(NetworkError::shape_mismatch(
                "concatenate_depth",
                format!("rows of {} values ({info})", info.size()),
                format!("rows of {} values", view.length()),
            ));
        }
        if view.entities() != first.entities()
            || info.height != first_info.height
            || info.width != first_info.width
        {
            return Err(NetworkError::shape_mismatch(
                "concatenate_depth",
                format!("{} samples of {}x{} slices", first.entities(), first_info.height, first_info.width),
                format!("{} samples of {}x{} slices", view.entities(), info.height, info.width),
            ));
        }
    }
    let channels = inputs.iter().map(|(_, info)| info.channels).sum();
    let out_info = TensorInfo::new(first_info.height, first_info.width, channels);
    let mut result = Tensor::new(first.entities(), out_info.size());
    result
        .data_mut()
        .par_chunks_mut(out_info.size())
        .enumerate()
        .for_each(|(n, row)| {
            let mut offset = 0;
            for (view, _) in inputs {
                let part = view.row(n);
                row[offset..offset + part.len()].copy_from_slice(part);
                offset += part.len();
            }
        });
    Ok((result, out_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenation_and_split_are_inverse() {
        let a = Tensor::from_vec(2, 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let b = Tensor::from_vec(2, 8, (10..26).map(|v| v as f32).collect()).unwrap();
        let (joined, info) = concatenate_depth(&[
            (a.view(), TensorInfo::new(2, 2, 1)),
            (b.view(), TensorInfo::new(2, 2, 2)),
        ])
        .unwrap();
        assert_eq!(info, TensorInfo::new(2, 2, 3));
        assert_eq!(&joined.row(1)[..4], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(joined.row(1)[4], 18.0);

        let parts = split_depth(joined.view(), info, &[1, 2]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let a = Tensor::new(1, 4);
        let b = Tensor::new(1, 9);
        assert!(concatenate_depth(&[
            (a.view(), TensorInfo::image(2, 2)),
            (b.view(), TensorInfo::image(3, 3)),
        ])
        .is_err());
        assert!(concatenate_depth(&[]).is_err());
        assert!(split_depth(a.view(), TensorInfo::new(2, 2, 1), &[2]).is_err());
    }
}
