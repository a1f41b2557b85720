// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Constant padding and border trimming along `w` and `h`.
//!
//! Both helpers leave the packed axis untouched, so they accept any element
//! pack for 3-D and 4-D tensors. A 2-D tensor packs `h` and therefore must
//! be pack1 to gain or lose rows.

use crate::{parallel, Element, Mat, Options};

/// Geometry of the bordered tensor, or `None` when the request is invalid.
fn bordered_shape(src: &Mat, rows: isize, cols: isize) -> Option<(usize, usize)> {
    let w = src.w() as isize + cols;
    let h = src.h() as isize + rows;
    if w <= 0 || h <= 0 {
        return None;
    }
    if src.dims() <= 2 && rows != 0 && src.elempack() != 1 {
        return None;
    }
    if src.dims() == 1 && rows != 0 {
        return None;
    }
    Some((w as usize, h as usize))
}

fn new_bordered(src: &Mat, w: usize, h: usize, opt: &Options) -> Mat {
    Mat::new_dims(
        src.dims(),
        w,
        if src.dims() == 1 { 1 } else { h },
        src.d(),
        src.c(),
        src.elemsize(),
        src.elempack(),
        opt.blob(),
    )
}

/// Copies a `sw × sh` window at (`left`, `top`) of every source slice into
/// every destination slice at (`dx`, `dy`).
#[allow(clippy::too_many_arguments)]
fn copy_window<T: Element>(
    src: &Mat,
    dst: &mut Mat,
    (sx, sy): (usize, usize),
    (dx, dy): (usize, usize),
    (ww, wh): (usize, usize),
    fill: Option<T>,
    opt: &Options,
) {
    let pack = src.elempack();
    let (sw, sh, dw, dh) = (src.w(), src.h(), dst.w(), dst.h());
    let depth = src.d();
    let src_step = src.cstep() * pack;
    let dst_step = dst.cstep() * pack;
    let input = src.as_slice::<T>();
    let threads = if src.dims() >= 3 { opt.resolve_threads() } else { 1 };

    parallel::for_each_chunk_mut(dst.as_mut_slice::<T>(), dst_step, threads, |q, out| {
        if let Some(v) = fill {
            out.fill(v);
        }
        let base = &input[q * src_step..];
        for z in 0..depth {
            let src_plane = &base[z * sw * sh * pack..];
            let dst_plane = &mut out[z * dw * dh * pack..];
            for y in 0..wh {
                let from = ((sy + y) * sw + sx) * pack;
                let to = ((dy + y) * dw + dx) * pack;
                dst_plane[to..to + ww * pack].copy_from_slice(&src_plane[from..from + ww * pack]);
            }
        }
    });
}

/// Surrounds every slice of `src` with a constant border.
///
/// Returns the empty tensor for shapes that cannot be bordered (packed rows
/// on a 2-D tensor, rows on a 1-D tensor) and on allocation failure.
pub fn copy_make_border<T: Element>(
    src: &Mat,
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
    value: T,
    opt: &Options,
) -> Mat {
    if src.is_empty() {
        return Mat::default();
    }
    let Some((w, h)) = bordered_shape(src, (top + bottom) as isize, (left + right) as isize)
    else {
        tracing::warn!(dims = src.dims(), elempack = src.elempack(), "border not supported");
        return Mat::default();
    };
    if top + bottom + left + right == 0 {
        return src.clone();
    }
    let mut dst = new_bordered(src, w, h, opt);
    if dst.is_empty() {
        return dst;
    }
    let window = (src.w(), if src.dims() == 1 { 1 } else { src.h() });
    copy_window(src, &mut dst, (0, 0), (left, top), window, Some(value), opt);
    dst
}

/// Removes a border from every slice of `src`.
///
/// Returns the empty tensor when the cut leaves nothing and on allocation
/// failure.
pub fn copy_cut_border<T: Element>(
    src: &Mat,
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
    opt: &Options,
) -> Mat {
    if src.is_empty() {
        return Mat::default();
    }
    let Some((w, h)) = bordered_shape(src, -((top + bottom) as isize), -((left + right) as isize))
    else {
        tracing::warn!(
            w = src.w(),
            h = src.h(),
            top,
            bottom,
            left,
            right,
            "border cut leaves nothing"
        );
        return Mat::default();
    };
    if top + bottom + left + right == 0 {
        return src.clone();
    }
    let mut dst = new_bordered(src, w, h, opt);
    if dst.is_empty() {
        return dst;
    }
    let rows = if src.dims() == 1 { 1 } else { h };
    copy_window::<T>(src, &mut dst, (left, top), (0, 0), (w, rows), None, opt);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert_packing;

    fn iota(n: usize) -> Vec<f32> {
        (1..=n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_make_border_3d() {
        let m = Mat::from_f32_3d(2, 2, 2, &iota(8)).unwrap();
        let b = copy_make_border(&m, 1, 0, 0, 1, -1.0f32, &Options::reference());
        assert_eq!((b.w(), b.h(), b.c()), (3, 3, 2));
        assert_eq!(
            b.channel_slice::<f32>(1),
            &[-1.0, -1.0, -1.0, 5.0, 6.0, -1.0, 7.0, 8.0, -1.0]
        );
    }

    #[test]
    fn test_cut_inverts_make() {
        let opt = Options {
            num_threads: 2,
            ..Options::reference()
        };
        let m = Mat::from_f32_3d(3, 4, 8, &iota(96)).unwrap();
        let packed = convert_packing(&m, 4, &opt);
        let b = copy_make_border(&packed, 2, 1, 1, 3, 0.0f32, &opt);
        assert_eq!(b.elempack(), 4);
        let cut = copy_cut_border::<f32>(&b, 2, 1, 1, 3, &opt);
        assert_eq!(cut.to_vec_f32(), m.to_vec_f32());
    }

    #[test]
    fn test_cut_4d_per_depth_slice() {
        let m = Mat::from_f32_4d(3, 3, 2, 1, &iota(18)).unwrap();
        let cut = copy_cut_border::<f32>(&m, 1, 1, 1, 1, &Options::reference());
        assert_eq!((cut.w(), cut.h(), cut.d()), (1, 1, 2));
        assert_eq!(cut.to_vec_f32(), vec![5.0, 14.0]);
    }

    #[test]
    fn test_2d_packed_rows_rejected() {
        let m = convert_packing(
            &Mat::from_f32_2d(2, 4, &iota(8)).unwrap(),
            4,
            &Options::reference(),
        );
        assert!(copy_make_border(&m, 1, 0, 0, 0, 0.0f32, &Options::reference()).is_empty());
        // Columns are still fine.
        let wide = copy_make_border(&m, 0, 0, 1, 0, 0.0f32, &Options::reference());
        assert_eq!(wide.w(), 3);
    }

    #[test]
    fn test_cut_everything_is_empty() {
        let m = Mat::from_f32_3d(2, 2, 1, &iota(4)).unwrap();
        assert!(copy_cut_border::<f32>(&m, 1, 1, 0, 0, &Options::reference()).is_empty());
    }

    #[test]
    fn test_zero_border_shares() {
        let m = Mat::from_f32_3d(2, 2, 1, &iota(4)).unwrap();
        let b = copy_make_border(&m, 0, 0, 0, 0, 0.0f32, &Options::reference());
        assert!(b.shares_storage_with(&m));
    }
}
