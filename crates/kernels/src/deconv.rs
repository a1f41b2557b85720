// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transposed convolution in gather form.
//!
//! Output pixel `(i, j)` takes tap `(y, x)` from input pixel `(sy, sx)` only
//! if the tap lands on a real input sample of the implicitly upsampled
//! image. Rows are rejected first, in this order: negative offset, offset
//! not on the stride grid, row past the input. Columns follow with the
//! same three tests. Weights are spatially flipped at pipeline creation so
//! the gather reproduces the scatter definition.

use crate::arith::Arith;
use crate::args::{ConvGeometry, KernelArgs};
use tensor_core::{parallel, Mat};

/// Input coordinate feeding output coordinate `o` through tap `t`, if any.
#[inline(always)]
pub(crate) fn gather_source(o: usize, t: usize, dilation: usize, extent: usize, stride: usize, len: usize) -> Option<usize> {
    let s = (o + t * dilation) as isize - (extent as isize - 1);
    if s < 0 || s % stride as isize != 0 {
        return None;
    }
    let s = s as usize / stride;
    if s >= len {
        return None;
    }
    Some(s)
}

/// Valid `(tap, input row)` pairs for output row `i`.
pub(crate) fn row_taps(g: &ConvGeometry, i: usize, h: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
    (0..g.kernel_h).filter_map(move |y| {
        gather_source(i, y, g.dilation_h, g.extent_h(), g.stride_h, h).map(|sy| (y, sy))
    })
}

/// Valid `(tap, input column)` pairs for output column `j`.
pub(crate) fn col_taps(g: &ConvGeometry, j: usize, w: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
    (0..g.kernel_w).filter_map(move |x| {
        gather_source(j, x, g.dilation_w, g.extent_w(), g.stride_w, w).map(|sx| (x, sx))
    })
}

/// Transposed convolution from pack`IN` input to pack`OUT` output.
///
/// Weights are the flipped kernel in `[outch/OUT][inch/IN][maxk][IN][OUT]`.
/// `output` holds the full untrimmed extent `(w-1)*stride + extent (+pad)`.
pub fn deconv_packed<A: Arith, const IN: usize, const OUT: usize>(
    args: &KernelArgs<'_>,
    output: &mut Mat,
) {
    let input = args.input;
    let g = args.geometry;
    let (w, h, inch) = (input.w(), input.h(), input.c());
    let (outw, outh) = (output.w(), output.h());
    let maxk = g.maxk();
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

                    for q in 0..inch {
                        let img = &src[q * in_step..];
                        let kq = &kp[q * maxk * IN * OUT..];
                        for (y, sy) in row_taps(&g, i, h) {
                            for (x, sx) in col_taps(&g, j, w) {
                                let at = sy * w + sx;
                                let val = &img[at * IN..(at + 1) * IN];
                                let k = y * g.kernel_w + x;
                                let wk = &kq[k * IN * OUT..(k + 1) * IN * OUT];
                                for (a, &v) in val.iter().enumerate() {
                                    for (l, s) in sum.iter_mut().enumerate() {
                                        *s = A::mla(*s, v, wk[a * OUT + l]);
                                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::Fp32;
    use crate::{flip_taps, pack_conv_weights, weights_mat, Activation};
    use hw_caps::Precision;
    use tensor_core::{convert_packing, Options};

    /// Scatter-form definition of the transposed convolution.
    fn scatter(
        input: &[f32],
        (w, h, inch): (usize, usize, usize),
        weights: &[f32],
        outch: usize,
        g: ConvGeometry,
    ) -> Vec<f32> {
        let (outw, outh) = g.deconv_output(w, h);
        let mut out = vec![0.0; outch * outw * outh];
        for o in 0..outch {
            for c in 0..inch {
                for sy in 0..h {
                    for sx in 0..w {
                        let v = input[(c * h + sy) * w + sx];
                        for y in 0..g.kernel_h {
                            for x in 0..g.kernel_w {
                                let oy = sy * g.stride_h + y * g.dilation_h;
                                let ox = sx * g.stride_w + x * g.dilation_w;
                                out[(o * outh + oy) * outw + ox] +=
                                    v * weights[((o * inch + c) * g.kernel_h + y) * g.kernel_w + x];
                            }
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_gather_source_rejection_order() {
        // extent 3, stride 2: offsets -2, -1 rejected, 1 off-grid, 4 → row 2.
        assert_eq!(gather_source(0, 0, 1, 3, 2, 4), None);
        assert_eq!(gather_source(1, 0, 1, 3, 2, 4), None);
        assert_eq!(gather_source(2, 0, 1, 3, 2, 4), Some(0));
        assert_eq!(gather_source(3, 0, 1, 3, 2, 4), None);
        assert_eq!(gather_source(6, 0, 1, 3, 2, 4), Some(2));
        assert_eq!(gather_source(10, 0, 1, 3, 2, 4), None);
    }

    #[test]
    fn test_gather_equals_scatter() {
        let (w, h, inch, outch) = (4, 3, 4, 4);
        let g = ConvGeometry {
            kernel_w: 3,
            kernel_h: 2,
            dilation_w: 1,
            dilation_h: 2,
            stride_w: 2,
            stride_h: 3,
        };
        let data: Vec<f32> = (0..w * h * inch).map(|i| (i % 7) as f32 - 3.0).collect();
        let raw: Vec<f32> = (0..outch * inch * 6).map(|i| (i % 5) as f32 * 0.5).collect();
        let (outw, outh) = g.deconv_output(w, h);
        let opt = Options::reference();

        let input = Mat::from_f32_3d(w, h, inch, &data).unwrap();
        let flipped = flip_taps(&raw, 6);
        for (in_pack, out_pack) in [(1, 1), (1, 4), (4, 4)] {
            let packed_in = convert_packing(&input, in_pack, &opt);
            let wm = weights_mat(
                &pack_conv_weights(&flipped, outch, inch, 6, in_pack, out_pack),
                Precision::Fp32,
                1,
            )
            .unwrap();
            let mut out = Mat::new_3d(outw, outh, outch / out_pack, 4 * out_pack, out_pack, None);
            let args = KernelArgs {
                input: &packed_in,
                weights: &wm,
                bias: &[],
                geometry: g,
                activation: Activation::Identity,
                num_threads: 2,
            };
            match (in_pack, out_pack) {
                (1, 1) => deconv_packed::<Fp32, 1, 1>(&args, &mut out),
                (1, 4) => deconv_packed::<Fp32, 1, 4>(&args, &mut out),
                _ => deconv_packed::<Fp32, 4, 4>(&args, &mut out),
            }
            assert_eq!(out.to_vec_f32(), scatter(&data, (w, h, inch), &raw, outch, g));
        }
    }

    #[test]
    fn test_1x1_unit_stride_is_elementwise_scale() {
        let data: Vec<f32> = (0..12).map(|i| i as f32 - 5.0).collect();
        let input = Mat::from_f32_3d(3, 2, 2, &data).unwrap();
        // One output channel: 2 * c0 + 0.5 * c1 + 1.
        let wm = weights_mat(&[2.0, 0.5], Precision::Fp32, 1).unwrap();
        let mut out = Mat::new_3d(3, 2, 1, 4, 1, None);
        deconv_packed::<Fp32, 1, 1>(
            &KernelArgs {
                input: &input,
                weights: &wm,
                bias: &[1.0],
                geometry: ConvGeometry::square(1, 1),
                activation: Activation::Identity,
                num_threads: 1,
            },
            &mut out,
        );
        let expect: Vec<f32> = (0..6).map(|i| 2.0 * data[i] + 0.5 * data[6 + i] + 1.0).collect();
        assert_eq!(out.to_vec_f32(), expect);
    }
}
