// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight relayouts performed once at pipeline creation.
//!
//! Source weights arrive in the parameter-file order `[outch][inch][maxk]`.
//! Packed kernels read `[outch/OUT][inch/IN][maxk][IN][OUT]`, so the `OUT`
//! lanes of one tap sit next to each other and load as one vector.
//! Depthwise kernels read `[channels/P][maxk][P]`.

use hw_caps::Precision;
use tensor_core::{cast_float32_to_bfloat16, cast_float32_to_float16, Mat, Options, TensorError};

/// Interleaves `[outch][inch][maxk]` weights for an `in_pack → out_pack` kernel.
pub fn pack_conv_weights(
    src: &[f32],
    outch: usize,
    inch: usize,
    maxk: usize,
    in_pack: usize,
    out_pack: usize,
) -> Vec<f32> {
    debug_assert_eq!(src.len(), outch * inch * maxk);
    let mut dst = Vec::with_capacity(src.len());
    for p in 0..outch / out_pack {
        for q in 0..inch / in_pack {
            for k in 0..maxk {
                for a in 0..in_pack {
                    for l in 0..out_pack {
                        let o = p * out_pack + l;
                        let i = q * in_pack + a;
                        dst.push(src[(o * inch + i) * maxk + k]);
                    }
                }
            }
        }
    }
    dst
}

/// Reverses the tap order of every `maxk`-sized kernel, turning a
/// scatter-form deconvolution kernel into its gather form.
pub fn flip_taps(src: &[f32], maxk: usize) -> Vec<f32> {
    let mut dst = vec![0.0; src.len()];
    for (to, from) in dst.chunks_exact_mut(maxk).zip(src.chunks_exact(maxk)) {
        for k in 0..maxk {
            to[maxk - 1 - k] = from[k];
        }
    }
    dst
}

/// Interleaves `[channels][maxk]` depthwise weights into `[channels/P][maxk][P]`.
pub fn pack_depthwise_weights(src: &[f32], channels: usize, maxk: usize, pack: usize) -> Vec<f32> {
    debug_assert_eq!(src.len(), channels * maxk);
    let mut dst = Vec::with_capacity(src.len());
    for g in 0..channels / pack {
        for k in 0..maxk {
            for l in 0..pack {
                dst.push(src[(g * pack + l) * maxk + k]);
            }
        }
    }
    dst
}

/// Reorders runtime deconvolution weights from `[group][inch_g][outch_g][maxk]`
/// to the stored `[group][outch_g][inch_g][maxk]`.
pub fn transpose_deconv_groups(
    src: &[f32],
    group: usize,
    inch_g: usize,
    outch_g: usize,
    maxk: usize,
) -> Vec<f32> {
    let block = inch_g * outch_g * maxk;
    let mut dst = vec![0.0; group * block];
    for g in 0..group {
        let wg = &src[g * block..(g + 1) * block];
        let wg2 = &mut dst[g * block..(g + 1) * block];
        for i in 0..outch_g {
            for j in 0..inch_g {
                for k in 0..maxk {
                    wg2[(i * inch_g + j) * maxk + k] = wg[(j * outch_g + i) * maxk + k];
                }
            }
        }
    }
    dst
}

/// Stores relaid `f32` weights as a flat tensor in the lane type of
/// `precision`.
pub fn weights_mat(data: &[f32], precision: Precision, num_threads: usize) -> Result<Mat, TensorError> {
    let flat = Mat::from_f32_1d(data.len(), data)?;
    let opt = Options {
        num_threads,
        ..Options::reference()
    };
    let stored = match precision {
        Precision::Fp32 => return Ok(flat),
        Precision::Fp16Storage | Precision::Fp16Arithmetic => cast_float32_to_float16(&flat, &opt),
        Precision::Bf16Storage => cast_float32_to_bfloat16(&flat, &opt),
    };
    if stored.is_empty() {
        return Err(TensorError::LengthMismatch {
            expected: data.len(),
            actual: 0,
        });
    }
    Ok(stored)
}
