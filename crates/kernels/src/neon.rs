// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! AArch64 NEON kernels (fp32, pack4).
//!
//! Only compiled on `aarch64`. Each kernel follows the loop structure and
//! accumulation order of its portable counterpart, and `vmlaq` is an
//! unfused multiply-add, so results are bit-identical to the portable set.
//! Half-precision entries stay portable: the `float16x8_t` intrinsics are
//! not available on stable Rust.

use crate::args::KernelArgs;
use crate::deconv::{col_taps, row_taps};
use crate::registry::{KernelKey, KernelRegistry, OpKind};
use hw_caps::{Isa, Precision};
use std::arch::aarch64::*;
use tensor_core::{parallel, Mat};

pub(crate) fn register(reg: &mut KernelRegistry) {
    let key = |op, i, o| KernelKey::new(op, i, o, Precision::Fp32);
    reg.insert(Isa::Neon, key(OpKind::Conv3x3s1, 1, 4), conv3x3s1_pack1to4_neon, "conv3x3s1_pack1to4_neon");
    reg.insert(Isa::Neon, key(OpKind::Conv3x3s2, 1, 4), conv3x3s2_pack1to4_neon, "conv3x3s2_pack1to4_neon");
    reg.insert(Isa::Neon, key(OpKind::ConvDepthwise, 4, 4), convdw_pack4_neon, "convdw_pack4_neon");
    reg.insert(Isa::Neon, key(OpKind::DeconvDepthwise, 4, 4), deconvdw_pack4_neon, "deconvdw_pack4_neon");
}

#[inline(always)]
fn load4(s: &[f32], at: usize) -> float32x4_t {
    let v = &s[at..at + 4];
    // SAFETY: `v` holds exactly four initialised f32 lanes.
    unsafe { vld1q_f32(v.as_ptr()) }
}

#[inline(always)]
fn store4(d: &mut [f32], at: usize, v: float32x4_t) {
    let o = &mut d[at..at + 4];
    // SAFETY: `o` has room for exactly four f32 lanes.
    unsafe { vst1q_f32(o.as_mut_ptr(), v) }
}

#[inline(always)]
fn mla(acc: float32x4_t, k: float32x4_t, v: f32) -> float32x4_t {
    // SAFETY: NEON is part of the aarch64 baseline.
    unsafe { vmlaq_n_f32(acc, k, v) }
}

/// `T` adjacent outputs of one 3×3 row triple.
#[inline(always)]
fn tile<const T: usize>(acc: &mut [f32], img: &[f32], r: [usize; 3], k: &[float32x4_t; 9], step: usize) {
    for t in 0..T {
        let mut sum = load4(acc, t * 4);
        for (row, &base) in r.iter().enumerate() {
            let x = base + t * step;
            sum = mla(sum, k[row * 3], img[x]);
            sum = mla(sum, k[row * 3 + 1], img[x + 1]);
            sum = mla(sum, k[row * 3 + 2], img[x + 2]);
        }
        store4(acc, t * 4, sum);
    }
}

fn conv3x3_pack1to4_neon<const STRIDE: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let (w, inch) = (input.w(), input.c());
    let (outw, outh) = (output.w(), output.h());
    let plane = outw * outh;
    let out_step = output.cstep() * 4;
    let in_step = input.cstep();
    let tailstep = if STRIDE == 1 { 2 } else { w - 2 * outw + w };

    let src = input.as_slice::<f32>();
    let kernel = args.weights.as_slice::<f32>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(output.as_mut_slice::<f32>(), out_step, args.num_threads, |p, out| {
        let mut acc = vec![0.0f32; plane * 4];
        for (i, a) in acc.iter_mut().enumerate() {
            *a = args.bias_at(p * 4 + i % 4);
        }

        let k0 = &kernel[p * inch * 36..];
        for q in 0..inch {
            let img = &src[q * in_step..];
            let kq = &k0[q * 36..(q + 1) * 36];
            let k: [float32x4_t; 9] = std::array::from_fn(|t| load4(kq, t * 4));
            let mut r = [0, w, 2 * w];
            let mut outptr = 0;
            for _ in 0..outh {
                let mut j = 0;
                if STRIDE == 1 {
                    while j + 7 < outw {
                        tile::<8>(&mut acc[outptr..], img, r, &k, 1);
                        r.iter_mut().for_each(|c| *c += 8);
                        outptr += 32;
                        j += 8;
                    }
                }
                while j + 3 < outw {
                    tile::<4>(&mut acc[outptr..], img, r, &k, STRIDE);
                    r.iter_mut().for_each(|c| *c += 4 * STRIDE);
                    outptr += 16;
                    j += 4;
                }
                while j + 1 < outw {
                    tile::<2>(&mut acc[outptr..], img, r, &k, STRIDE);
                    r.iter_mut().for_each(|c| *c += 2 * STRIDE);
                    outptr += 8;
                    j += 2;
                }
                while j < outw {
                    tile::<1>(&mut acc[outptr..], img, r, &k, STRIDE);
                    r.iter_mut().for_each(|c| *c += STRIDE);
                    outptr += 4;
                    j += 1;
                }
                r.iter_mut().for_each(|c| *c += tailstep);
            }
        }

        for (o, a) in out[..plane * 4].iter_mut().zip(&acc) {
            *o = activation.apply(*a);
        }
    });
}

pub fn conv3x3s1_pack1to4_neon(args: &KernelArgs<'_>, output: &mut Mat) {
    conv3x3_pack1to4_neon::<1>(args, output);
}

pub fn conv3x3s2_pack1to4_neon(args: &KernelArgs<'_>, output: &mut Mat) {
    conv3x3_pack1to4_neon::<2>(args, output);
}

#[inline(always)]
fn vmla(acc: float32x4_t, a: float32x4_t, b: float32x4_t) -> float32x4_t {
    // SAFETY: NEON is part of the aarch64 baseline.
    unsafe { vmlaq_f32(acc, a, b) }
}

#[inline(always)]
fn finish(out: &mut [f32], at: usize, sum: float32x4_t, activation: crate::Activation) {
    store4(out, at, sum);
    for v in &mut out[at..at + 4] {
        *v = activation.apply(*v);
    }
}

pub fn convdw_pack4_neon(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let g = args.geometry;
    let w = input.w();
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let space_ofs = g.space_offsets(w);
    let in_step = input.cstep() * 4;
    let out_step = output.cstep() * 4;

    let src = input.as_slice::<f32>();
    let kernel = args.weights.as_slice::<f32>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(output.as_mut_slice::<f32>(), out_step, args.num_threads, |c, out| {
        let img = &src[c * in_step..];
        let kc = &kernel[c * maxk * 4..(c + 1) * maxk * 4];
        let bias: [f32; 4] = std::array::from_fn(|l| args.bias_at(c * 4 + l));
        let bias = load4(&bias, 0);

        for i in 0..outh {
            for j in 0..outw {
                let mut sum = bias;
                let origin = i * g.stride_h * w + j * g.stride_w;
                for (k, &ofs) in space_ofs.iter().enumerate() {
                    sum = vmla(sum, load4(img, (origin + ofs) * 4), load4(kc, k * 4));
                }
                finish(out, (i * outw + j) * 4, sum, activation);
            }
        }
    });
}

pub fn deconvdw_pack4_neon(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let g = args.geometry;
    let (w, h) = (input.w(), input.h());
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let in_step = input.cstep() * 4;
    let out_step = output.cstep() * 4;

    let src = input.as_slice::<f32>();
    let kernel = args.weights.as_slice::<f32>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(output.as_mut_slice::<f32>(), out_step, args.num_threads, |c, out| {
        let img = &src[c * in_step..];
        let kc = &kernel[c * maxk * 4..(c + 1) * maxk * 4];
        let bias: [f32; 4] = std::array::from_fn(|l| args.bias_at(c * 4 + l));
        let bias = load4(&bias, 0);

        for i in 0..outh {
            for j in 0..outw {
                let mut sum = bias;
                for (y, sy) in row_taps(&g, i, h) {
                    for (x, sx) in col_taps(&g, j, w) {
                        let val = load4(img, (sy * w + sx) * 4);
                        sum = vmla(sum, val, load4(kc, (y * g.kernel_w + x) * 4));
                    }
                }
                finish(out, (i * outw + j) * 4, sum, activation);
            }
        }
    });
}
