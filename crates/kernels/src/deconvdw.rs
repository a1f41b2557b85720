// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise transposed convolution, gather form.

use crate::arith::Arith;
use crate::args::KernelArgs;
use crate::deconv::{col_taps, row_taps};
use tensor_core::{parallel, Mat};

/// Depthwise transposed convolution on pack`P` tensors.
///
/// Weights are the flipped kernels in `[channels/P][maxk][P]`; tap validity
/// follows [`crate::deconv_packed`].
pub fn deconvdw_packed<A: Arith, const P: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let g = args.geometry;
    let (w, h) = (input.w(), input.h());
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let in_step = input.cstep() * P;
    let out_step = output.cstep() * P;

    let src = input.as_slice::<A::Storage>();
    let kernel = args.weights.as_slice::<A::Storage>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(
        output.as_mut_slice::<A::Storage>(),
        out_step,
        args.num_threads,
        |c, out| {
            let img = &src[c * in_step..];
            let kc = &kernel[c * maxk * P..(c + 1) * maxk * P];
            let mut bias = [A::Acc::default(); P];
            for (l, b) in bias.iter_mut().enumerate() {
                *b = A::acc_from_f32(args.bias_at(c * P + l));
            }

            for i in 0..outh {
                for j in 0..outw {
                    let mut sum = bias;
                    for (y, sy) in row_taps(&g, i, h) {
                        for (x, sx) in col_taps(&g, j, w) {
                            let at = sy * w + sx;
                            let val = &img[at * P..(at + 1) * P];
                            let k = y * g.kernel_w + x;
                            let wk = &kc[k * P..(k + 1) * P];
                            for l in 0..P {
                                sum[l] = A::mla(sum[l], val[l], wk[l]);
                            }
                        }
                    }
                    let o = (i * outw + j) * P;
                    for (dst, s) in out[o..o + P].iter_mut().zip(sum) {
                        *dst = A::store(activation.apply(A::acc_to_f32(s)));
                    }
                }
            }
        },
    );
}
