// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Window copy along one axis, the CPU half of the slice operator.
//!
//! Works on raw stored units, so any lane type and any pack is handled as
//! long as source and destination share both. Along the packed axis the
//! offset counts stored units, not logical elements.

use tensor_core::{parallel, Mat};

/// Position of ncnn axis `axis` among the unit coordinates `(c, d, h, w)`.
fn unit_axis(dims: usize, axis: usize) -> usize {
    // dims 1: w; dims 2: h w; dims 3: c h w; dims 4: c d h w.
    match (dims, axis) {
        (1, _) => 3,
        (2, 0) => 2,
        (2, _) => 3,
        (3, 0) => 0,
        (3, 1) => 2,
        (3, _) => 3,
        (_, a) => a.min(3),
    }
}

/// Copies the window of `src` that starts `offset` units along `axis` and
/// has `dst`'s extent into `dst`.
///
/// `axis` is non-negative and counts from the outermost axis of a
/// `src.dims()`-rank tensor. Channels of `dst` are filled in parallel.
pub fn slice_copy(src: &Mat, dst: &mut Mat, axis: usize, offset: usize, num_threads: usize) {
    debug_assert_eq!(src.elemsize(), dst.elemsize());
    let unit = src.elemsize();
    let mut origin = [0usize; 4];
    origin[unit_axis(src.dims(), axis)] = offset;
    let [oc, od, oh, ow] = origin;

    let (sw, sh, s_step) = (src.w(), src.h(), src.cstep());
    let (dw, dh, dd) = (dst.w(), dst.h(), dst.d());
    let row_bytes = dw * unit;
    let d_step = dst.cstep() * unit;
    let bytes = src.as_bytes();

    parallel::for_each_chunk_mut(dst.as_bytes_mut(), d_step, num_threads, |q, out| {
        let plane = (q + oc) * s_step;
        for z in 0..dd {
            for y in 0..dh {
                let from = (plane + ((z + od) * sh + y + oh) * sw + ow) * unit;
                let to = (z * dh + y) * row_bytes;
                out[to..to + row_bytes].copy_from_slice(&bytes[from..from + row_bytes]);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota3(w: usize, h: usize, c: usize) -> Mat {
        let data: Vec<f32> = (0..w * h * c).map(|v| v as f32).collect();
        Mat::from_f32_3d(w, h, c, &data).unwrap()
    }

    #[test]
    fn test_slice_width() {
        let src = iota3(4, 2, 2);
        let mut dst = Mat::new_3d(2, 2, 2, 4, 1, None);
        slice_copy(&src, &mut dst, 2, 1, 2);
        assert_eq!(dst.to_vec_f32(), vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0, 13.0, 14.0]);
    }

    #[test]
    fn test_slice_height_and_channels() {
        let src = iota3(2, 3, 3);
        let mut rows = Mat::new_3d(2, 1, 3, 4, 1, None);
        slice_copy(&src, &mut rows, 1, 2, 1);
        assert_eq!(rows.to_vec_f32(), vec![4.0, 5.0, 10.0, 11.0, 16.0, 17.0]);

        let mut chans = Mat::new_3d(2, 3, 1, 4, 1, None);
        slice_copy(&src, &mut chans, 0, 1, 1);
        assert_eq!(chans.to_vec_f32(), (6..12).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_slice_depth_4d() {
        let data: Vec<f32> = (0..2 * 1 * 3 * 2).map(|v| v as f32).collect();
        let src = Mat::from_f32_4d(2, 1, 3, 2, &data).unwrap();
        let mut dst = Mat::new_4d(2, 1, 1, 2, 4, 1, None);
        slice_copy(&src, &mut dst, 1, 2, 1);
        assert_eq!(dst.to_vec_f32(), vec![4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn test_slice_packed_rows_in_units() {
        // 2-D, h = 8 packed by 4: unit offset 1 is logical row 4.
        let data: Vec<f32> = (0..3 * 8).map(|v| v as f32).collect();
        let src = tensor_core::convert_packing(
            &Mat::from_f32_2d(3, 8, &data).unwrap(),
            4,
            &tensor_core::Options::reference(),
        );
        let mut dst = Mat::new_2d(3, 1, 16, 4, None);
        slice_copy(&src, &mut dst, 0, 1, 1);
        assert_eq!(dst.to_vec_f32(), (12..24).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_slice_1d() {
        let src = Mat::from_f32_1d(6, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let mut dst = Mat::new_1d(2, 4, 1, None);
        slice_copy(&src, &mut dst, 0, 3, 1);
        assert_eq!(dst.to_vec_f32(), vec![3.0, 4.0]);
    }
}
