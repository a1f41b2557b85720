// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dense convolution frontend.
//!
//! `create_pipeline` relays the `[outch][inch][maxk]` weights for the
//! chosen precision and pack pair and binds a kernel: the 3×3 pack1→N fast
//! path when the window qualifies, the generic packed kernel otherwise.
//! `forward` pads, runs the kernel and returns a blob-allocated output.

use crate::error::{LayerError, Result};
use crate::params::{ConvParams, Family};
use crate::pipeline::{
    elempack_for, lane_bytes, make_border, pipeline_precision, repack_input, ConvPipeline, PipelineState,
};
use hw_caps::{Capabilities, Precision};
use kernels::{pack_conv_weights, weights_mat, KernelArgs, KernelKey, OpKind};
use param_ir::{ModelBin, ParamDict, AUTO_PAD, SAME_LOWER_PAD};
use tensor_core::{Mat, Options};

#[derive(Debug)]
pub struct Convolution {
    pub params: ConvParams,
    weight_data: Option<Mat>,
    bias_data: Vec<f32>,
    pipeline: Option<ConvPipeline>,
    state: PipelineState,
}

impl Convolution {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        Ok(Self {
            params: ConvParams::load(pd, Family::Convolution)?,
            weight_data: None,
            bias_data: Vec::new(),
            pipeline: None,
            state: PipelineState::Unconfigured,
        })
    }

    /// Pulls the weights, then the bias when `bias_term` is set.
    pub fn load_model(&mut self, mb: &mut dyn ModelBin) -> Result<()> {
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
        let p = &self.params;
        let weights = self.weight_data.as_ref().ok_or(LayerError::MissingWeights("convolution"))?;
        let precision = pipeline_precision(opt, caps);
        let (num_input, maxk) = (p.num_input(), p.maxk());
        let in_pack = elempack_for(num_input, precision, opt, caps);
        let out_pack = elempack_for(p.num_output, precision, opt, caps);

        let g = p.geometry();
        let op = match (g.is_3x3(1), g.is_3x3(2)) {
            (true, _) if in_pack == 1 && out_pack > 1 => OpKind::Conv3x3s1,
            (_, true) if in_pack == 1 && out_pack > 1 => OpKind::Conv3x3s2,
            _ => OpKind::Conv,
        };
        let kernel = ConvPipeline::resolve_kernel(caps, KernelKey::new(op, in_pack, out_pack, precision))?;

        let raw = weights.to_vec_f32();
        let relaid = pack_conv_weights(&raw, p.num_output, num_input, maxk, in_pack, out_pack);
        let weights = weights_mat(&relaid, precision, opt.resolve_threads())?;

        tracing::info!(
            kernel = kernel.name,
            precision = precision.as_str(),
            in_pack,
            out_pack,
            "convolution pipeline created"
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
            tracing::info!("convolution pipeline destroyed");
        }
        if self.state == PipelineState::Created {
            self.state = PipelineState::Destroyed;
        }
    }

    fn ready(&self) -> Result<&ConvPipeline> {
        self.pipeline.as_ref().ok_or(LayerError::NotReady(self.state))
    }

    /// Output planes this operator produces for a `w × h` input.
    pub(crate) fn output_shape(&self, w: usize, h: usize) -> Result<(usize, usize)> {
        let (w, h) = padded_extent(&self.params, w, h);
        self.params.geometry().conv_output(w, h).ok_or_else(|| {
            LayerError::InvalidInput(format!("{w}x{h} input is smaller than the kernel window"))
        })
    }

    pub fn forward(&self, bottom: &Mat, opt: &Options) -> Result<Mat> {
        let pipeline = self.ready()?;
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let (outw, outh) = self.output_shape(bottom.w(), bottom.h())?;
        let out_pack = pipeline.out_pack;
        let mut top = Mat::new_3d(
            outw,
            outh,
            self.params.num_output / out_pack,
            lane_bytes(pipeline.precision) * out_pack,
            out_pack,
            opt.blob(),
        );
        if top.is_empty() {
            return Err(LayerError::Allocation);
        }
        self.forward_into(bottom, &mut top, opt)?;
        Ok(top)
    }

    /// Runs into a preallocated `top` of the output geometry.
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
        let padded = make_padding(&self.params, &input, pipeline.precision, opt)?;
        let args = KernelArgs {
            input: &padded,
            weights: &pipeline.weights,
            bias: &self.bias_data,
            geometry: self.params.geometry(),
            activation: self.params.activation(),
            num_threads: opt.resolve_threads(),
        };
        (pipeline.kernel.func)(&args, top);
        Ok(())
    }
}

/// Pads that `make_padding` applies to a `w × h` input, `[top, bottom, left, right]`.
pub(crate) fn padding_for(p: &ConvParams, w: usize, h: usize) -> [usize; 4] {
    if p.has_explicit_pad() {
        let side = |v: i32| v.max(0) as usize;
        return [side(p.pad_top), side(p.pad_bottom), side(p.pad_left), side(p.pad_right)];
    }
    let same_upper = p.pads_are(AUTO_PAD);
    if !same_upper && !p.pads_are(SAME_LOWER_PAD) {
        return [0; 4];
    }
    let g = p.geometry();
    let wpad = (g.extent_w() + (w - 1) / g.stride_w * g.stride_w).saturating_sub(w);
    let hpad = (g.extent_h() + (h - 1) / g.stride_h * g.stride_h).saturating_sub(h);
    if same_upper {
        [hpad / 2, hpad - hpad / 2, wpad / 2, wpad - wpad / 2]
    } else {
        [hpad - hpad / 2, hpad / 2, wpad - wpad / 2, wpad / 2]
    }
}

fn padded_extent(p: &ConvParams, w: usize, h: usize) -> (usize, usize) {
    let [top, bottom, left, right] = padding_for(p, w, h);
    (w + left + right, h + top + bottom)
}

/// Applies explicit or automatic padding into the workspace.
pub(crate) fn make_padding(
    p: &ConvParams,
    input: &Mat,
    precision: Precision,
    opt: &Options,
) -> Result<Mat> {
    let pads = padding_for(p, input.w(), input.h());
    if pads == [0; 4] {
        return Ok(input.clone());
    }
    make_border(input, pads, p.pad_value, precision, &opt.scratch())
}
