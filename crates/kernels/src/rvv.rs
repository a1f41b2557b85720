// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RISC-V vector kernels: depthwise deconvolution at pack `packn`.
//!
//! Stable Rust has no RVV intrinsics, so these are written in the shape the
//! vector unit wants and left to the auto-vectoriser: one pack of `packn`
//! lanes is one register group, every tap is a `vfmacc.vv` over the whole
//! group, and the valid taps of an output row are resolved once per row
//! instead of once per pixel. With a 128-bit `vlen`, `packn` is 8 for fp16.
//!
//! These kernels are emulated: portable Rust registered under [`Isa::Rvv`],
//! not RVV intrinsics or inline assembly. The code is target independent and
//! registered on every architecture, which keeps it testable off-target.

use crate::arith::{Arith, Fp16s, Fp16sa};
use crate::args::KernelArgs;
use crate::deconv::{col_taps, row_taps};
use crate::registry::{KernelKey, KernelRegistry, OpKind};
use hw_caps::{Isa, Precision};
use tensor_core::{parallel, Mat};

pub(crate) fn register(reg: &mut KernelRegistry) {
    reg.insert(
        Isa::Rvv,
        KernelKey::new(OpKind::DeconvDepthwise, 8, 8, Precision::Fp16Storage),
        deconvdw_packn_rvv::<Fp16s, 8>,
        "deconvdw_packn_fp16s_rvv",
    );
    reg.insert(
        Isa::Rvv,
        KernelKey::new(OpKind::DeconvDepthwise, 8, 8, Precision::Fp16Arithmetic),
        deconvdw_packn_rvv::<Fp16sa, 8>,
        "deconvdw_packn_fp16sa_rvv",
    );
    reg.insert(
        Isa::Rvv,
        KernelKey::new(OpKind::DeconvDepthwise, 4, 4, Precision::Fp16Storage),
        deconvdw_packn_rvv::<Fp16s, 4>,
        "deconvdw_packn_fp16s_rvv",
    );
    reg.insert(
        Isa::Rvv,
        KernelKey::new(OpKind::DeconvDepthwise, 4, 4, Precision::Fp16Arithmetic),
        deconvdw_packn_rvv::<Fp16sa, 4>,
        "deconvdw_packn_fp16sa_rvv",
    );
}

/// `acc[l] += a[l] * b[l]` over one register group.
#[inline(always)]
fn vfmacc<A: Arith, const N: usize>(acc: &mut [A::Acc; N], a: &[A::Storage], b: &[A::Storage]) {
    for ((s, &x), &k) in acc.iter_mut().zip(a).zip(b) {
        *s = A::mla(*s, x, k);
    }
}

/// Depthwise transposed convolution with `N`-lane register groups.
pub fn deconvdw_packn_rvv<A: Arith, const N: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let g = args.geometry;
    let (w, h) = (input.w(), input.h());
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let in_step = input.cstep() * N;
    let out_step = output.cstep() * N;
    let rows: Vec<Vec<_>> = (0..outh).map(|i| row_taps(&g, i, h).collect()).collect();
    let cols: Vec<Vec<_>> = (0..outw).map(|j| col_taps(&g, j, w).collect()).collect();

    let src = input.as_slice::<A::Storage>();
    let kernel = args.weights.as_slice::<A::Storage>();
    let activation = args.activation;

    parallel::for_each_chunk_mut(output.as_mut_slice::<A::Storage>(), out_step, args.num_threads, |c, out| {
        let img = &src[c * in_step..];
        let kc = &kernel[c * maxk * N..(c + 1) * maxk * N];
        let bias: [A::Acc; N] = std::array::from_fn(|l| A::acc_from_f32(args.bias_at(c * N + l)));

        let mut outptr = 0;
        for row in &rows {
            for col in &cols {
                let mut sum = bias;
                for &(y, sy) in row {
                    let line = &img[sy * w * N..];
                    for &(x, sx) in col {
                        let k = (y * g.kernel_w + x) * N;
                        vfmacc::<A, N>(&mut sum, &line[sx * N..(sx + 1) * N], &kc[k..k + N]);
                    }
                }
                for (dst, s) in out[outptr..outptr + N].iter_mut().zip(sum) {
                    *dst = A::store(activation.apply(A::acc_to_f32(s)));
                }
                outptr += N;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deconvdw_packed, flip_taps, pack_depthwise_weights, weights_mat, Activation, ConvGeometry};
    use half::f16;
    use tensor_core::{cast_float32_to_float16, convert_packing, Options};

    #[test]
    fn test_packn_matches_portable_bitwise() {
        let (w, h, ch) = (7, 4, 16);
        let g = ConvGeometry {
            kernel_w: 3,
            kernel_h: 2,
            dilation_w: 2,
            dilation_h: 1,
            stride_w: 2,
            stride_h: 3,
        };
        let opt = Options::reference();
        let data: Vec<f32> = (0..w * h * ch).map(|i| ((i * 13 % 29) as f32 - 14.0) * 0.1).collect();
        let raw: Vec<f32> = (0..ch * 6).map(|i| ((i * 5 % 11) as f32 - 5.0) * 0.07).collect();
        let bias: Vec<f32> = (0..ch).map(|c| c as f32 * 0.01).collect();
        let input = cast_float32_to_float16(
            &convert_packing(&Mat::from_f32_3d(w, h, ch, &data).unwrap(), 8, &opt),
            &opt,
        );
        let wm = weights_mat(
            &pack_depthwise_weights(&flip_taps(&raw, 6), ch, 6, 8),
            Precision::Fp16Arithmetic,
            1,
        )
        .unwrap();
        let args = KernelArgs {
            input: &input,
            weights: &wm,
            bias: &bias,
            geometry: g,
            activation: Activation::Sigmoid,
            num_threads: 2,
        };
        let (outw, outh) = g.deconv_output(w, h);
        let mut a = Mat::new_3d(outw, outh, 2, 16, 8, None);
        let mut b = Mat::new_3d(outw, outh, 2, 16, 8, None);
        deconvdw_packn_rvv::<Fp16sa, 8>(&args, &mut a);
        deconvdw_packed::<Fp16sa, 8>(&args, &mut b);
        assert_eq!(a.to_vec::<f16>(), b.to_vec::<f16>());

        deconvdw_packn_rvv::<Fp16s, 8>(&args, &mut a);
        deconvdw_packed::<Fp16s, 8>(&args, &mut b);
        assert_eq!(a.to_vec::<f16>(), b.to_vec::<f16>());
    }
}
