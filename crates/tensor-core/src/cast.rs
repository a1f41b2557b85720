// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Precision casts between `f32` and the 16-bit storage formats.
//!
//! Casts keep geometry and element pack; only the lane width changes.
//! Narrowing to `f16` rounds to nearest even, narrowing to `bf16` truncates
//! the low mantissa bits. Widening is exact in both cases.

use crate::{parallel, Element, Mat, Options};
use half::{bf16, f16};

fn cast_lanes<S: Element, D: Element>(src: &Mat, opt: &Options) -> Mat {
    if src.is_empty() {
        return Mat::default();
    }
    let out_elemsize = std::mem::size_of::<D>() * src.elempack();
    let mut dst = Mat::new_dims(
        src.dims(),
        src.w(),
        src.h(),
        src.d(),
        src.c(),
        out_elemsize,
        src.elempack(),
        opt.blob(),
    );
    if dst.is_empty() {
        return dst;
    }

    let plane = src.plane_units() * src.elempack();
    let src_step = src.cstep() * src.elempack();
    let dst_step = dst.cstep() * dst.elempack();
    let input = src.as_slice::<S>();
    parallel::for_each_chunk_mut(
        dst.as_mut_slice::<D>(),
        dst_step,
        opt.resolve_threads(),
        |q, out| {
            let from = &input[q * src_step..q * src_step + plane];
            for (o, &v) in out[..plane].iter_mut().zip(from) {
                *o = D::from_f32(v.to_f32());
            }
        },
    );
    dst
}

pub fn cast_float32_to_float16(src: &Mat, opt: &Options) -> Mat {
    cast_lanes::<f32, f16>(src, opt)
}

pub fn cast_float16_to_float32(src: &Mat, opt: &Options) -> Mat {
    cast_lanes::<f16, f32>(src, opt)
}

pub fn cast_float32_to_bfloat16(src: &Mat, opt: &Options) -> Mat {
    cast_lanes::<f32, bf16>(src, opt)
}

pub fn cast_bfloat16_to_float32(src: &Mat, opt: &Options) -> Mat {
    cast_lanes::<bf16, f32>(src, opt)
}
