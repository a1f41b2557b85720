// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Direct 3×3 convolution from pack1 input to pack4/pack8 output.
//!
//! For each output channel group the kernel seeds an accumulator plane with
//! the bias, then walks the input channels. Per input channel the nine
//! `N`-lane weight taps are loaded once and three row cursors `r0`, `r1`,
//! `r2` stream across the image. Output columns are consumed in tiles of
//! 8, 4, 2 and finally 1 (stride 1) or 4, 2, 1 (stride 2), so there is no
//! column-remainder branch inside a tile.
//!
//! Stride 1 advances each row cursor by 2 after a row (the window overhang);
//! stride 2 advances by `tailstep = w - 2 * outw + w`, skipping the unused
//! trailing column and the odd row.

use crate::arith::Arith;
use crate::args::KernelArgs;
use tensor_core::{parallel, Mat};

/// Nine `N`-lane taps of one input channel.
struct Taps<'a, T, const N: usize> {
    k: &'a [T],
}

impl<T: Copy, const N: usize> Taps<'_, T, N> {
    #[inline(always)]
    fn lane(&self, tap: usize, l: usize) -> T {
        self.k[tap * N + l]
    }
}

/// Accumulates `T` adjacent outputs starting at row cursors `r`.
///
/// `step` is the input distance between adjacent outputs (the stride).
#[inline(always)]
fn tile<A: Arith, const N: usize, const T: usize>(
    acc: &mut [A::Acc],
    img: &[A::Storage],
    r: [usize; 3],
    taps: &Taps<'_, A::Storage, N>,
    step: usize,
) {
    for t in 0..T {
        let sum = &mut acc[t * N..(t + 1) * N];
        for (row, &base) in r.iter().enumerate() {
            let x = base + t * step;
            for kx in 0..3 {
                let v = img[x + kx];
                let tap = row * 3 + kx;
                for (l, s) in sum.iter_mut().enumerate() {
                    *s = A::mla(*s, v, taps.lane(tap, l));
                }
            }
        }
    }
}

fn conv3x3_pack1ton<A: Arith, const N: usize, const STRIDE: usize>(
    args: &KernelArgs<'_>,
    output: &mut Mat,
) {
    let input = args.input;
    let (w, inch) = (input.w(), input.c());
    let (outw, outh) = (output.w(), output.h());
    let out_step = output.cstep() * N;
    let plane = outw * outh;
    let in_step = input.cstep();
    let tailstep = if STRIDE == 1 { 2 } else { w - 2 * outw + w };

    let src = input.as_slice::<A::Storage>();
    let kernel = args.weights.as_slice::<A::Storage>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(
        output.as_mut_slice::<A::Storage>(),
        out_step,
        args.num_threads,
        |p, out| {
            let mut acc = vec![A::Acc::default(); plane * N];
            for (i, a) in acc.iter_mut().enumerate() {
                *a = A::acc_from_f32(args.bias_at(p * N + i % N));
            }

            let k0 = &kernel[p * inch * 9 * N..];
            for q in 0..inch {
                let img = &src[q * in_step..];
                let taps = Taps::<_, N> {
                    k: &k0[q * 9 * N..(q + 1) * 9 * N],
                };
                let mut r = [0, w, 2 * w];
                let mut outptr = 0;
                for _ in 0..outh {
                    let mut j = 0;
                    if STRIDE == 1 {
                        while j + 7 < outw {
                            tile::<A, N, 8>(&mut acc[outptr..], img, r, &taps, 1);
                            r.iter_mut().for_each(|c| *c += 8);
                            outptr += 8 * N;
                            j += 8;
                        }
                    }
                    while j + 3 < outw {
                        tile::<A, N, 4>(&mut acc[outptr..], img, r, &taps, STRIDE);
                        r.iter_mut().for_each(|c| *c += 4 * STRIDE);
                        outptr += 4 * N;
                        j += 4;
                    }
                    while j + 1 < outw {
                        tile::<A, N, 2>(&mut acc[outptr..], img, r, &taps, STRIDE);
                        r.iter_mut().for_each(|c| *c += 2 * STRIDE);
                        outptr += 2 * N;
                        j += 2;
                    }
                    while j < outw {
                        tile::<A, N, 1>(&mut acc[outptr..], img, r, &taps, STRIDE);
                        r.iter_mut().for_each(|c| *c += STRIDE);
                        outptr += N;
                        j += 1;
                    }
                    r.iter_mut().for_each(|c| *c += tailstep);
                }
            }

            for (o, a) in out[..plane * N].iter_mut().zip(&acc) {
                *o = A::store(activation.apply(A::acc_to_f32(*a)));
            }
        },
    );
}

/// 3×3 stride-1 convolution, pack1 input to pack`N` output.
pub fn conv3x3s1_pack1ton<A: Arith, const N: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    conv3x3_pack1ton::<A, N, 1>(args, output);
}

/// 3×3 stride-2 convolution, pack1 input to pack`N` output.
pub fn conv3x3s2_pack1ton<A: Arith, const N: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    conv3x3_pack1ton::<A, N, 2>(args, output);
}
