// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise convolution: every channel against its own kernel.

use crate::arith::Arith;
use crate::args::KernelArgs;
use tensor_core::{parallel, Mat};

/// Depthwise convolution on pack`P` tensors.
///
/// Weights are `[channels/P][maxk][P]`. There is no cross-channel
/// accumulation, so each task owns one channel group end to end.
pub fn convdw_packed<A: Arith, const P: usize>(args: &KernelArgs<'_>, output: &mut Mat) {
    let input = args.input;
    let g = args.geometry;
    let w = input.w();
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
    let space_ofs = g.space_offsets(w);
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
                    let origin = i * g.stride_h * w + j * g.stride_w;
                    for (k, &ofs) in space_ofs.iter().enumerate() {
                        let val = &img[(origin + ofs) * P..(origin + ofs + 1) * P];
                        let wk = &kc[k * P..(k + 1) * P];
                        for l in 0..P {
                            sum[l] = A::mla(sum[l], val[l], wk[l]);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{Fp16sa, Fp32};
    use crate::{conv_packed, pack_depthwise_weights, weights_mat, Activation, ConvGeometry};
    use hw_caps::Precision;
    use tensor_core::{cast_float16_to_float32, cast_float32_to_float16, convert_packing, Options};

    #[test]
    fn test_pack4_equals_per_channel_reference() {
        let (w, h, ch) = (9, 7, 8);
        let g = ConvGeometry {
            kernel_w: 3,
            kernel_h: 3,
            dilation_w: 2,
            dilation_h: 1,
            stride_w: 2,
            stride_h: 1,
        };
        let data: Vec<f32> = (0..w * h * ch).map(|i| (i % 13) as f32 * 0.25 - 1.5).collect();
        let raw: Vec<f32> = (0..ch * 9).map(|i| (i % 5) as f32 * 0.5 - 1.0).collect();
        let bias: Vec<f32> = (0..ch).map(|c| c as f32).collect();
        let (outw, outh) = g.conv_output(w, h).unwrap();
        let opt = Options::reference();

        let input = Mat::from_f32_3d(w, h, ch, &data).unwrap();
        let packed = convert_packing(&input, 4, &opt);
        let wm = weights_mat(&pack_depthwise_weights(&raw, ch, 9, 4), Precision::Fp32, 1).unwrap();
        let mut out = Mat::new_3d(outw, outh, ch / 4, 16, 4, None);
        convdw_packed::<Fp32, 4>(
            &KernelArgs {
                input: &packed,
                weights: &wm,
                bias: &bias,
                geometry: g,
                activation: Activation::Identity,
                num_threads: 2,
            },
            &mut out,
        );
        let got = out.to_vec_f32();

        // Each channel alone through the generic reference.
        let plane = outw * outh;
        for c in 0..ch {
            let single = input.channel_range(c, 1);
            let wc = weights_mat(&raw[c * 9..(c + 1) * 9], Precision::Fp32, 1).unwrap();
            let mut expect = Mat::new_3d(outw, outh, 1, 4, 1, None);
            conv_packed::<Fp32, 1, 1>(
                &KernelArgs {
                    input: &single,
                    weights: &wc,
                    bias: &bias[c..c + 1],
                    geometry: g,
                    activation: Activation::Identity,
                    num_threads: 1,
                },
                &mut expect,
            );
            assert_eq!(&got[c * plane..(c + 1) * plane], expect.to_vec_f32().as_slice());
        }
    }

    #[test]
    fn test_pack8_fp16sa() {
        let (w, h, ch) = (5, 5, 8);
        let g = ConvGeometry::square(3, 1);
        let opt = Options::reference();
        let data: Vec<f32> = (0..w * h * ch).map(|i| (i % 4) as f32 * 0.5).collect();
        let raw = vec![0.25f32; ch * 9];
        let input = cast_float32_to_float16(
            &convert_packing(&Mat::from_f32_3d(w, h, ch, &data).unwrap(), 8, &opt),
            &opt,
        );
        let wm = weights_mat(&pack_depthwise_weights(&raw, ch, 9, 8), Precision::Fp16Arithmetic, 1).unwrap();
        let mut out = Mat::new_3d(3, 3, 1, 16, 8, None);
        convdw_packed::<Fp16sa, 8>(
            &KernelArgs {
                input: &input,
                weights: &wm,
                bias: &[],
                geometry: g,
                activation: Activation::Clip { min: 0.0, max: 2.0 },
                num_threads: 1,
            },
            &mut out,
        );
        let got = cast_float16_to_float32(&out, &opt).to_vec_f32();
        for v in got {
            assert!((0.0..=2.0).contains(&v));
            // Every partial sum is a multiple of 1/8 below 4: exact in f16.
            assert_eq!((v * 8.0).fract(), 0.0);
        }
    }
}
