// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline state and the decisions every frontend shares: which precision
//! a pipeline is built for, which precision a forward call runs in, and how
//! wide to pack a channel count.

use crate::error::{LayerError, Result};
use hw_caps::{Capabilities, Precision};
use kernels::{KernelEntry, KernelKey, KernelRegistry};
use tensor_core::{bf16, copy_cut_border, copy_make_border, f16, Element, Mat, Options};

/// Lifecycle of an operator.
///
/// `Unconfigured → Created → (forward)* → Destroyed`; a destroyed operator
/// may be created again while its original weights are still held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Unconfigured,
    Created,
    Destroyed,
}

/// Precision weights are prepared in, from options and hardware facts.
pub fn pipeline_precision(opt: &Options, caps: &Capabilities) -> Precision {
    if caps.fp16_storage && opt.use_fp16_storage {
        if caps.fp16_arithmetic && opt.use_fp16_arithmetic {
            Precision::Fp16Arithmetic
        } else {
            Precision::Fp16Storage
        }
    } else if caps.bf16_storage && opt.use_bf16_storage {
        Precision::Bf16Storage
    } else {
        Precision::Fp32
    }
}

/// Precision a forward call runs in, chosen from the input's lane width.
///
/// Sixteen-bit inputs take fp16 when fp16 storage is on (fp16sa with
/// arithmetic enabled), else bf16 when bf16 storage is on. Everything else
/// runs in fp32.
pub fn forward_precision(elembits: usize, opt: &Options, caps: &Capabilities) -> Precision {
    if elembits == 16 && caps.fp16_storage && opt.use_fp16_storage {
        if caps.fp16_arithmetic && opt.use_fp16_arithmetic {
            Precision::Fp16Arithmetic
        } else {
            Precision::Fp16Storage
        }
    } else if elembits == 16 && caps.bf16_storage && opt.use_bf16_storage {
        Precision::Bf16Storage
    } else {
        Precision::Fp32
    }
}

/// Element pack for `n` channels: the preferred width when it divides,
/// else 4 when that divides, else 1.
pub fn elempack_for(n: usize, precision: Precision, opt: &Options, caps: &Capabilities) -> usize {
    if !opt.use_packing_layout {
        return 1;
    }
    let preferred = caps.preferred_pack(precision);
    if preferred == 8 && n % 8 == 0 {
        8
    } else if n % 4 == 0 {
        4
    } else {
        1
    }
}

/// Bytes per lane of `precision`'s storage type.
pub(crate) fn lane_bytes(precision: Precision) -> usize {
    precision.storage_bits() / 8
}

/// Weights and kernel fixed at pipeline creation.
#[derive(Debug)]
pub(crate) struct ConvPipeline {
    pub precision: Precision,
    pub in_pack: usize,
    pub out_pack: usize,
    pub kernel: KernelEntry,
    pub weights: Mat,
    pub caps: Capabilities,
}

impl ConvPipeline {
    pub fn resolve_kernel(caps: &Capabilities, key: KernelKey) -> Result<KernelEntry> {
        Ok(KernelRegistry::global().resolve(caps, key)?)
    }

    /// Rejects inputs whose lane width selects another precision.
    pub fn check_precision(&self, input: &Mat, opt: &Options) -> Result<()> {
        let input = forward_precision(input.elembits(), opt, &self.caps);
        if input != self.precision {
            return Err(LayerError::PrecisionMismatch {
                pipeline: self.precision,
                input,
            });
        }
        tracing::debug!(precision = input.as_str(), kernel = self.kernel.name, "forward path");
        Ok(())
    }
}

/// Repacks `input` to `pack` into the workspace when it differs.
pub(crate) fn repack_input(input: &Mat, pack: usize, opt: &Options) -> Result<Mat> {
    if input.elempack() == pack {
        return Ok(input.clone());
    }
    let out = tensor_core::convert_packing(input, pack, &opt.scratch());
    if out.is_empty() || out.elempack() != pack {
        return Err(LayerError::Allocation);
    }
    Ok(out)
}

fn make_border_as<T: Element>(src: &Mat, pads: [usize; 4], value: f32, opt: &Options) -> Mat {
    let [top, bottom, left, right] = pads;
    copy_make_border::<T>(src, top, bottom, left, right, T::from_f32(value), opt)
}

/// Pads `src` by `[top, bottom, left, right]` with `value` in its own lane type.
pub(crate) fn make_border(src: &Mat, pads: [usize; 4], value: f32, precision: Precision, opt: &Options) -> Result<Mat> {
    let out = match precision {
        Precision::Fp32 => make_border_as::<f32>(src, pads, value, opt),
        Precision::Bf16Storage => make_border_as::<bf16>(src, pads, value, opt),
        Precision::Fp16Storage | Precision::Fp16Arithmetic => make_border_as::<f16>(src, pads, value, opt),
    };
    if out.is_empty() {
        return Err(LayerError::Allocation);
    }
    Ok(out)
}

/// Removes `[top, bottom, left, right]` from every plane of `src`.
pub(crate) fn cut_border(src: &Mat, pads: [usize; 4], precision: Precision, opt: &Options) -> Result<Mat> {
    let [top, bottom, left, right] = pads;
    let out = match precision {
        Precision::Fp32 => copy_cut_border::<f32>(src, top, bottom, left, right, opt),
        Precision::Bf16Storage => copy_cut_border::<bf16>(src, top, bottom, left, right, opt),
        Precision::Fp16Storage | Precision::Fp16Arithmetic => copy_cut_border::<f16>(src, top, bottom, left, right, opt),
    };
    if out.is_empty() {
        return Err(LayerError::Allocation);
    }
    Ok(out)
}

/// Reads a weight tensor as flat `f32`, widening 16-bit lanes.
///
/// A 16-bit tensor is decoded in the storage format a 16-bit input would
/// run in under `opt` and `caps`, so fp16 wins over bf16 only when the
/// device stores fp16.
pub(crate) fn flatten_f32(m: &Mat, opt: &Options, caps: &Capabilities) -> Result<Vec<f32>> {
    if m.elembits() != 16 {
        return Ok(m.to_vec_f32());
    }
    match forward_precision(16, opt, caps) {
        Precision::Fp16Storage | Precision::Fp16Arithmetic => {
            Ok(m.to_vec::<f16>().into_iter().map(Element::to_f32).collect())
        }
        Precision::Bf16Storage => Ok(m.to_vec::<bf16>().into_iter().map(Element::to_f32).collect()),
        Precision::Fp32 => Err(LayerError::InvalidInput(format!(
            "16-bit tensor {m:?} with neither fp16 nor bf16 storage enabled"
        ))),
    }
}
