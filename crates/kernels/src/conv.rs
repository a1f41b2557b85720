// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Generic packed direct convolution.
//!
//! Handles any window, stride and dilation between any pair of packs. The
//! `<Fp32, 1, 1>` instance is the scalar reference every specialised kernel
//! is tested against: per output it seeds the bias, then accumulates input
//! channels in order and, within a channel, taps in row-major order.

use crate::arith::Arith;
use crate::args::KernelArgs;
use tensor_core::{parallel, Mat};

/// Convolution from pack`IN` input to pack`OUT` output.
///
/// Weights are laid out `[outch/OUT][inch/IN][maxk][IN][OUT]` (see
/// [`crate::pack_conv_weights`]); the input is already padded.
pub fn conv_packed<A: Arith, const IN: usize, const OUT: usize>(
    args: &KernelArgs<'_>,
    output: &mut Mat,
) {
    let input = args.input;
    let g = args.geometry;
    let (w, inch) = (input.w(), input.c());
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let space_ofs = g.space_offsets(w);
    let in_step = input.cstep() * IN;
    let out_step = output.cstep() * OUT;

    let src = input.as_slice::<A::Storage>();
    let kernel = args.weights.as_slice::<A::Storage>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(
        output.as_mut_slice::<A::Storage>(),
        out_step,
        args.num_threads,
        |p, out| {
            let kp = &kernel[p * inch * maxk * IN * OUT..];
            for i in 0..outh {
                for j in 0..outw {
                    let mut sum = [A::Acc::default(); OUT];
                    for (l, s) in sum.iter_mut().enumerate() {
                        *s = A::acc_from_f32(args.bias_at(p * OUT + l));
                    }

                    let origin = i * g.stride_h * w + j * g.stride_w;
                    for q in 0..inch {
                        let img = &src[q * in_step..];
                        let kq = &kp[q * maxk * IN * OUT..];
                        for (k, &ofs) in space_ofs.iter().enumerate() {
                            let val = &img[(origin + ofs) * IN..(origin + ofs + 1) * IN];
                            let wk = &kq[k * IN * OUT..(k + 1) * IN * OUT];
                            for (a, &v) in val.iter().enumerate() {
                                for (l, s) in sum.iter_mut().enumerate() {
                                    *s = A::mla(*s, v, wk[a * OUT + l]);
                                }
                            }
                        }
                    }

                    let o = (i * outw + j) * OUT;
                    for (dst, s) in out[o..o + OUT].iter_mut().zip(sum) {
                        *dst = A::store(activation.apply(A::acc_to_f32(s)));
                    }
                }
            }
        },
    );
}
