// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-pack conversion.
//!
//! Repacking moves lanes between stored units along the packed axis (see
//! [`Mat::packed_axis`]); the lane type is irrelevant, so conversion works on
//! raw 1/2/4-byte lanes and serves `f32`, `f16` and `bf16` tensors alike.

use crate::{parallel, Mat, Options};

/// Returns `src` re-laid with `out_elempack` lanes per stored unit.
///
/// * Equal packs return a handle sharing `src`'s storage (no copy).
/// * A packed-axis extent that `out_elempack` does not divide returns `src`
///   unchanged.
/// * Allocation failure returns the empty tensor.
///
/// The output comes from `opt.blob_allocator`; pass [`Options::scratch`] to
/// draw from the workspace instead.
///
/// # Examples
/// ```
/// use tensor_core::{convert_packing, Mat, Options};
///
/// let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
/// let m = Mat::from_f32_3d(1, 1, 8, &data).unwrap();
/// let packed = convert_packing(&m, 4, &Options::reference());
/// assert_eq!(packed.c(), 2);
/// assert_eq!(packed.elemsize(), 16);
/// assert_eq!(packed.channel_slice::<f32>(1), &[4.0, 5.0, 6.0, 7.0]);
/// ```
pub fn convert_packing(src: &Mat, out_elempack: usize, opt: &Options) -> Mat {
    let elempack = src.elempack();
    if src.is_empty() || elempack == out_elempack {
        return src.clone();
    }

    let (outer, _, _) = src.packed_axis();
    let logical = outer * elempack;
    if out_elempack == 0 || logical % out_elempack != 0 {
        return src.clone();
    }
    let out_outer = logical / out_elempack;
    let out_elemsize = src.elemsize() / elempack * out_elempack;

    let mut dst = match src.dims() {
        1 => Mat::new_1d(out_outer, out_elemsize, out_elempack, opt.blob()),
        2 => Mat::new_2d(src.w(), out_outer, out_elemsize, out_elempack, opt.blob()),
        3 => Mat::new_3d(src.w(), src.h(), out_outer, out_elemsize, out_elempack, opt.blob()),
        _ => Mat::new_4d(
            src.w(),
            src.h(),
            src.d(),
            out_outer,
            out_elemsize,
            out_elempack,
            opt.blob(),
        ),
    };
    if dst.is_empty() {
        return dst;
    }

    match src.elemsize() / elempack {
        4 => repack::<u32>(src, &mut dst, opt),
        2 => repack::<u16>(src, &mut dst, opt),
        1 => repack::<u8>(src, &mut dst, opt),
        lane => {
            tracing::warn!(lane, "unsupported lane size for repacking");
            return src.clone();
        }
    }
    dst
}

fn repack<T: bytemuck::Pod + Send + Sync>(src: &Mat, dst: &mut Mat, opt: &Options) {
    let in_pack = src.elempack();
    let out_pack = dst.elempack();
    let (_, inner, src_stride) = src.packed_axis();
    let (_, _, dst_stride) = dst.packed_axis();
    let src_lanes = src.as_slice::<T>();

    // One chunk per packed coordinate of the output; only 3-D/4-D planes are
    // large enough to be worth forking.
    let threads = if dst.dims() >= 3 { opt.resolve_threads() } else { 1 };
    parallel::for_each_chunk_mut(
        dst.as_mut_slice::<T>(),
        dst_stride * out_pack,
        threads,
        |o, out| {
            for k in 0..out_pack {
                let logical = o * out_pack + k;
                let (so, sl) = (logical / in_pack, logical % in_pack);
                let base = so * src_stride;
                for i in 0..inner {
                    out[i * out_pack + k] = src_lanes[(base + i) * in_pack + sl];
                }
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn iota(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 * 0.5 - 3.0).collect()
    }

    #[test]
    fn test_same_pack_shares_storage() {
        let m = Mat::from_f32_3d(2, 2, 3, &iota(12)).unwrap();
        let out = convert_packing(&m, 1, &Options::reference());
        assert!(out.shares_storage_with(&m));
    }

    #[test]
    fn test_indivisible_returns_source() {
        let m = Mat::from_f32_3d(2, 2, 6, &iota(24)).unwrap();
        let out = convert_packing(&m, 4, &Options::reference());
        assert_eq!(out.elempack(), 1);
        assert!(out.shares_storage_with(&m));
    }

    #[test]
    fn test_pack4_layout_3d() {
        let m = Mat::from_f32_3d(3, 1, 4, &iota(12)).unwrap();
        let p = convert_packing(&m, 4, &Options::reference());
        assert_eq!((p.c(), p.elempack(), p.elemsize()), (1, 4, 16));
        // Unit (x) holds channel lanes 0..4 at column x.
        let lanes = p.channel_slice::<f32>(0);
        assert_eq!(&lanes[0..4], &[iota(12)[0], iota(12)[3], iota(12)[6], iota(12)[9]]);
    }

    #[test]
    fn test_roundtrip_all_ranks_and_packs() {
        let opt = Options {
            num_threads: 3,
            ..Options::reference()
        };
        let sources = [
            Mat::from_f32_1d(16, &iota(16)).unwrap(),
            Mat::from_f32_2d(3, 8, &iota(24)).unwrap(),
            Mat::from_f32_3d(5, 3, 16, &iota(240)).unwrap(),
            Mat::from_f32_4d(2, 3, 2, 8, &iota(96)).unwrap(),
        ];
        for src in &sources {
            for first in [4, 8] {
                let packed = convert_packing(src, first, &opt);
                assert_eq!(packed.elempack(), first);
                assert_eq!(packed.to_vec_f32(), src.to_vec_f32());
                for second in [1, 4, 8] {
                    let again = convert_packing(&packed, second, &opt);
                    assert_eq!(again.to_vec_f32(), src.to_vec_f32(), "dims {} {first}->{second}", src.dims());
                }
            }
        }
    }

    #[test]
    fn test_16bit_lanes() {
        let m = crate::cast_float32_to_float16(
            &Mat::from_f32_3d(2, 2, 8, &iota(32)).unwrap(),
            &Options::reference(),
        );
        let p = convert_packing(&m, 8, &Options::reference());
        assert_eq!(p.elemsize(), 16);
        let back = convert_packing(&p, 1, &Options::reference());
        assert_eq!(back.to_vec::<f16>(), m.to_vec::<f16>());
    }

    #[test]
    fn test_empty_in_empty_out() {
        assert!(convert_packing(&Mat::default(), 4, &Options::reference()).is_empty());
    }
}
