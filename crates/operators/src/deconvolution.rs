// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transposed convolution frontend.
//!
//! The kernel always produces the full bordered extent
//! `(w - 1) * stride + extent + output_pad`; pads and a requested output
//! size are applied afterwards by cutting that tensor down.

use crate::error::{LayerError, Result};
use crate::params::{ConvParams, Family};
use crate::pipeline::{
    cut_border, elempack_for, flatten_f32, lane_bytes, pipeline_precision, repack_input, ConvPipeline, PipelineState,
};
use hw_caps::{Capabilities, Precision};
use kernels::{flip_taps, pack_conv_weights, transpose_deconv_groups, weights_mat, KernelArgs, KernelKey, OpKind};
use param_ir::{MatArrayModelBin, ModelBin, ParamDict, AUTO_PAD, SAME_LOWER_PAD};
use tensor_core::{Mat, Options};

#[derive(Debug)]
pub struct Deconvolution {
    pub params: ConvParams,
    weight_data: Option<Mat>,
    bias_data: Vec<f32>,
    pipeline: Option<ConvPipeline>,
    caps: Option<Capabilities>,
    state: PipelineState,
}

impl Deconvolution {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        Ok(Self {
            params: ConvParams::load(pd, Family::Deconvolution)?,
            weight_data: None,
            bias_data: Vec::new(),
            pipeline: None,
            caps: None,
            state: PipelineState::Unconfigured,
        })
    }

    /// Runtime-weight operators take their weights as inputs and load nothing.
    pub fn load_model(&mut self, mb: &mut dyn ModelBin) -> Result<()> {
        if self.params.dynamic_weight {
            return Ok(());
        }
        self.weight_data = Some(mb.load(self.params.weight_data_size, 0)?);
        if self.params.bias_term {
            self.bias_data = mb.load(self.params.num_output, 1)?.to_vec_f32();
        }
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn create_pipeline(&mut self, opt: &Options, caps: &Capabilities) -> Result<()> {
        self.caps = Some(*caps);
        if self.params.dynamic_weight {
            self.state = PipelineState::Created;
            return Ok(());
        }

        let p = &self.params;
        let weights = self.weight_data.as_ref().ok_or(LayerError::MissingWeights("deconvolution"))?;
        let precision = pipeline_precision(opt, caps);
        let (num_input, maxk) = (p.num_input(), p.maxk());
        let in_pack = elempack_for(num_input, precision, opt, caps);
        let out_pack = elempack_for(p.num_output, precision, opt, caps);
        let kernel =
            ConvPipeline::resolve_kernel(caps, KernelKey::new(OpKind::Deconv, in_pack, out_pack, precision))?;

        let flipped = flip_taps(&weights.to_vec_f32(), maxk);
        let relaid = pack_conv_weights(&flipped, p.num_output, num_input, maxk, in_pack, out_pack);
        let weights = weights_mat(&relaid, precision, opt.resolve_threads())?;

        tracing::info!(
            kernel = kernel.name,
            precision = precision.as_str(),
            in_pack,
            out_pack,
            "deconvolution pipeline created"
        );
        self.pipeline = Some(ConvPipeline {
            precision,
            in_pack,
            out_pack,
            kernel,
            weights,
            caps: *caps,
        });
        if opt.lightmode {
            self.weight_data = None;
        }
        self.state = PipelineState::Created;
        Ok(())
    }

    pub fn destroy_pipeline(&mut self) {
        if self.pipeline.take().is_some() {
            tracing::info!("deconvolution pipeline destroyed");
        }
        if self.state == PipelineState::Created {
            self.state = PipelineState::Destroyed;
        }
    }

    fn ready(&self) -> Result<&ConvPipeline> {
        self.pipeline.as_ref().ok_or(LayerError::NotReady(self.state))
    }

    /// Untrimmed output extent for a `w × h` input.
    pub(crate) fn bordered_shape(&self, w: usize, h: usize) -> (usize, usize) {
        let (outw, outh) = self.params.geometry().deconv_output(w, h);
        (outw + self.params.output_pad_right, outh + self.params.output_pad_bottom)
    }

    pub fn forward(&self, bottom: &Mat, opt: &Options) -> Result<Mat> {
        let pipeline = self.ready()?;
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let (outw, outh) = self.bordered_shape(bottom.w(), bottom.h());
        let out_pack = pipeline.out_pack;
        let alloc = if needs_cut(&self.params) { opt.workspace() } else { opt.blob() };
        let mut bordered = Mat::new_3d(
            outw,
            outh,
            self.params.num_output / out_pack,
            lane_bytes(pipeline.precision) * out_pack,
            out_pack,
            alloc,
        );
        if bordered.is_empty() {
            return Err(LayerError::Allocation);
        }
        self.forward_into(bottom, &mut bordered, opt)?;
        cut_padding(&self.params, bordered, pipeline.precision, opt)
    }

    /// Writes the bordered output into a preallocated `top`.
    pub(crate) fn forward_into(&self, bottom: &Mat, top: &mut Mat, opt: &Options) -> Result<()> {
        let pipeline = self.ready()?;
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        if bottom.dims() != 3 || bottom.c() * bottom.elempack() != self.params.num_input() {
            return Err(LayerError::InvalidInput(format!(
                "expected {} input channels, got {bottom:?}",
                self.params.num_input()
            )));
        }
        pipeline.check_precision(bottom, opt)?;

        let input = repack_input(bottom, pipeline.in_pack, opt)?;
        let args = KernelArgs {
            input: &input,
            weights: &pipeline.weights,
            bias: &self.bias_data,
            geometry: self.params.geometry(),
            activation: self.params.activation(),
            num_threads: opt.resolve_threads(),
        };
        (pipeline.kernel.func)(&args, top);
        Ok(())
    }

    /// Forward with weights supplied at run time: `[input, weight, bias?]`.
    ///
    /// The weight tensor is `w = kernel_w, h = kernel_h, d = outch, c = inch`.
    /// A temporary operator is built around it, run once and dropped.
    pub fn forward_dynamic(&self, bottoms: &[Mat], opt: &Options) -> Result<Mat> {
        let caps = match (self.state, self.caps) {
            (PipelineState::Created, Some(caps)) => caps,
            _ => return Err(LayerError::NotReady(self.state)),
        };
        let (child, mats) = runtime_weights(&self.params, bottoms, opt, &caps)?;
        let mut op = Deconvolution::load_param(&child.to_dict(Family::Deconvolution))?;
        op.load_model(&mut MatArrayModelBin::new(mats))?;
        op.create_pipeline(opt, &caps)?;
        let out = op.forward(&bottoms[0], opt);
        op.destroy_pipeline();
        out
    }
}

/// Whether the bordered output is cut down before it is returned.
pub(crate) fn needs_cut(p: &ConvParams) -> bool {
    p.has_explicit_pad() || (p.output_w > 0 && p.output_h > 0)
}

/// Trims the bordered output to its final size.
///
/// Explicit pads are cut as given. Otherwise a requested output size is
/// reached by splitting the excess: `-233` puts the smaller half first,
/// `-234` the larger half first, and without either the whole excess is cut
/// from the end.
pub(crate) fn cut_padding(p: &ConvParams, bordered: Mat, precision: Precision, opt: &Options) -> Result<Mat> {
    let (w, h) = (bordered.w(), bordered.h());
    let pads = if p.has_explicit_pad() {
        let side = |v: i32| v.max(0) as usize;
        [side(p.pad_top), side(p.pad_bottom), side(p.pad_left), side(p.pad_right)]
    } else if p.output_w > 0 && p.output_h > 0 {
        if p.output_w > w || p.output_h > h {
            return Err(LayerError::InvalidParam(format!(
                "output {}x{} exceeds the {w}x{h} deconvolution extent",
                p.output_w, p.output_h
            )));
        }
        let (wcut, hcut) = (w - p.output_w, h - p.output_h);
        if p.pads_are(AUTO_PAD) {
            [hcut / 2, hcut - hcut / 2, wcut / 2, wcut - wcut / 2]
        } else if p.pads_are(SAME_LOWER_PAD) {
            [hcut - hcut / 2, hcut / 2, wcut - wcut / 2, wcut / 2]
        } else {
            [0, hcut, 0, wcut]
        }
    } else {
        return Ok(bordered);
    };

    let [top, bottom, left, right] = pads;
    if top + bottom >= h || left + right >= w {
        return Err(LayerError::InvalidParam(format!(
            "pads {pads:?} leave nothing of the {w}x{h} deconvolution output"
        )));
    }
    cut_border(&bordered, pads, precision, opt)
}

/// Builds the parameters and model tensors of a one-shot operator from
/// runtime weight inputs.
///
/// Weights arrive `[group][inch_g][outch_g][maxk]` and are transposed to
/// the stored `[group][outch_g][inch_g][maxk]`; 16-bit tensors are widened
/// in the storage format `caps` and `opt` resolve to.
pub(crate) fn runtime_weights(
    p: &ConvParams,
    bottoms: &[Mat],
    opt: &Options,
    caps: &Capabilities,
) -> Result<(ConvParams, Vec<Mat>)> {
    let wanted = if p.bias_term { 3 } else { 2 };
    if bottoms.len() < wanted {
        return Err(LayerError::InvalidInput(format!(
            "runtime weights need {wanted} inputs, got {}",
            bottoms.len()
        )));
    }
    let (input, weight) = (&bottoms[0], &bottoms[1]);
    if input.is_empty() || weight.is_empty() {
        return Err(LayerError::Allocation);
    }

    let num_input = input.c() * input.elempack();
    let (kernel_w, kernel_h) = (weight.w(), weight.h());
    let outch_g = weight.d();
    let group = p.group;
    if num_input % group != 0 {
        return Err(LayerError::InvalidInput(format!(
            "{num_input} input channels do not split into {group} groups"
        )));
    }
    let inch_g = num_input / group;
    let maxk = kernel_w * kernel_h;

    let flat = flatten_f32(weight, opt, caps)?;
    if flat.len() != group * inch_g * outch_g * maxk {
        return Err(LayerError::InvalidInput(format!(
            "weight tensor {weight:?} does not match {num_input} inputs in {group} groups"
        )));
    }
    let transposed = transpose_deconv_groups(&flat, group, inch_g, outch_g, maxk);

    let mut mats = vec![Mat::from_f32_1d(transposed.len(), &transposed)?];
    if p.bias_term {
        let bias = flatten_f32(&bottoms[2], opt, caps)?;
        mats.push(Mat::from_f32_1d(bias.len(), &bias)?);
    }

    let child = ConvParams {
        num_output: outch_g * group,
        kernel_w,
        kernel_h,
        weight_data_size: transposed.len(),
        dynamic_weight: false,
        ..p.clone()
    };
    Ok((child, mats))
}
