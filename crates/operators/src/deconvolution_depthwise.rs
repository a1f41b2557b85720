// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise and grouped transposed convolution frontend.
//!
//! Mirrors [`crate::ConvolutionDepthWise`]: a per-channel kernel when
//! `channels == group == num_output`, otherwise one [`Deconvolution`] per
//! group writing into its channel range of a shared bordered output. Pads
//! and the requested output size are cut once, after all groups ran.

use crate::deconvolution::{cut_padding, needs_cut, runtime_weights, Deconvolution};
use crate::error::{LayerError, Result};
use crate::params::{ConvParams, Family};
use crate::pipeline::{
    elempack_for, forward_precision, lane_bytes, pipeline_precision, repack_input, ConvPipeline, PipelineState,
};
use hw_caps::{Capabilities, Precision};
use kernels::{flip_taps, pack_depthwise_weights, weights_mat, KernelArgs, KernelKey, OpKind};
use param_ir::{MatArrayModelBin, ModelBin, ParamDict};
use tensor_core::{convert_packing, Mat, Options};

#[derive(Debug)]
enum Mode {
    Depthwise(ConvPipeline),
    Grouped {
        ops: Vec<Deconvolution>,
        precision: Precision,
        caps: Capabilities,
    },
    /// Weights arrive with every forward call.
    Dynamic(Capabilities),
}

#[derive(Debug)]
pub struct DeconvolutionDepthWise {
    pub params: ConvParams,
    weight_data: Option<Mat>,
    bias_data: Vec<f32>,
    mode: Option<Mode>,
    state: PipelineState,
}

impl DeconvolutionDepthWise {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        Ok(Self {
            params: ConvParams::load(pd, Family::Deconvolution)?,
            weight_data: None,
            bias_data: Vec::new(),
            mode: None,
            state: PipelineState::Unconfigured,
        })
    }

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

    pub fn is_depthwise(&self) -> bool {
        let p = &self.params;
        p.num_input() == p.group && p.group == p.num_output
    }

    pub fn create_pipeline(&mut self, opt: &Options, caps: &Capabilities) -> Result<()> {
        if self.params.dynamic_weight {
            self.mode = Some(Mode::Dynamic(*caps));
            self.state = PipelineState::Created;
            return Ok(());
        }

        let weights = self
            .weight_data
            .as_ref()
            .ok_or(LayerError::MissingWeights("deconvolution depthwise"))?;
        let raw = weights.to_vec_f32();
        let precision = pipeline_precision(opt, caps);
        let p = &self.params;
        let maxk = p.maxk();

        let mode = if self.is_depthwise() {
            let channels = p.group;
            let pack = elempack_for(channels, precision, opt, caps);
            let kernel = ConvPipeline::resolve_kernel(
                caps,
                KernelKey::new(OpKind::DeconvDepthwise, pack, pack, precision),
            )?;
            let relaid = pack_depthwise_weights(&flip_taps(&raw, maxk), channels, maxk, pack);
            tracing::info!(kernel = kernel.name, channels, "depthwise deconvolution pipeline created");
            Mode::Depthwise(ConvPipeline {
                precision,
                in_pack: pack,
                out_pack: pack,
                kernel,
                weights: weights_mat(&relaid, precision, opt.resolve_threads())?,
                caps: *caps,
            })
        } else {
            let channels_g = p.num_input() / p.group;
            let num_output_g = p.num_output / p.group;
            let block = maxk * channels_g * num_output_g;
            let child = ConvParams {
                num_output: num_output_g,
                pad_left: 0,
                pad_right: 0,
                pad_top: 0,
                pad_bottom: 0,
                output_w: 0,
                output_h: 0,
                weight_data_size: block,
                group: 1,
                ..p.clone()
            }
            .to_dict(Family::Deconvolution);

            let mut ops = Vec::with_capacity(p.group);
            for g in 0..p.group {
                let mut mats = vec![Mat::from_f32_1d(block, &raw[g * block..(g + 1) * block])?];
                if p.bias_term {
                    let b = &self.bias_data[g * num_output_g..(g + 1) * num_output_g];
                    mats.push(Mat::from_f32_1d(num_output_g, b)?);
                }
                let mut op = Deconvolution::load_param(&child)?;
                op.load_model(&mut MatArrayModelBin::new(mats))?;
                op.create_pipeline(opt, caps)?;
                ops.push(op);
            }
            tracing::info!(group = p.group, channels_g, num_output_g, "grouped deconvolution pipeline created");
            Mode::Grouped {
                ops,
                precision,
                caps: *caps,
            }
        };

        self.mode = Some(mode);
        if opt.lightmode {
            self.weight_data = None;
        }
        self.state = PipelineState::Created;
        Ok(())
    }

    pub fn destroy_pipeline(&mut self) {
        match self.mode.take() {
            Some(Mode::Grouped { mut ops, .. }) => ops.iter_mut().for_each(Deconvolution::destroy_pipeline),
            Some(_) => {}
            None => return,
        }
        tracing::info!("deconvolution depthwise pipeline destroyed");
        self.state = PipelineState::Destroyed;
    }

    pub fn forward(&self, bottom: &Mat, opt: &Options) -> Result<Mat> {
        let mode = self.mode.as_ref().ok_or(LayerError::NotReady(self.state))?;
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let p = &self.params;
        let (precision, caps) = match mode {
            Mode::Depthwise(pipeline) => {
                pipeline.check_precision(bottom, opt)?;
                (pipeline.precision, pipeline.caps)
            }
            Mode::Grouped { precision, caps, .. } => {
                let input = forward_precision(bottom.elembits(), opt, caps);
                if input != *precision {
                    return Err(LayerError::PrecisionMismatch {
                        pipeline: *precision,
                        input,
                    });
                }
                (*precision, *caps)
            }
            Mode::Dynamic(_) => {
                return Err(LayerError::InvalidInput(
                    "runtime-weight deconvolution needs its weight inputs".to_string(),
                ))
            }
        };
        if bottom.dims() != 3 || bottom.c() * bottom.elempack() != p.num_input() {
            return Err(LayerError::InvalidInput(format!(
                "expected {} input channels, got {bottom:?}",
                p.num_input()
            )));
        }

        let (outw, outh) = p.geometry().deconv_output(bottom.w(), bottom.h());
        let (outw, outh) = (outw + p.output_pad_right, outh + p.output_pad_bottom);
        let lane = lane_bytes(precision);
        let out_pack = elempack_for(p.num_output, precision, opt, &caps);
        let cut = needs_cut(p);
        let alloc = if cut { opt.workspace() } else { opt.blob() };
        let mut bordered = Mat::new_3d(outw, outh, p.num_output / out_pack, lane * out_pack, out_pack, alloc);
        if bordered.is_empty() {
            return Err(LayerError::Allocation);
        }

        match mode {
            Mode::Depthwise(pipeline) => {
                let input = repack_input(bottom, pipeline.in_pack, opt)?;
                let args = KernelArgs {
                    input: &input,
                    weights: &pipeline.weights,
                    bias: &self.bias_data,
                    geometry: p.geometry(),
                    activation: p.activation(),
                    num_threads: opt.resolve_threads(),
                };
                (pipeline.kernel.func)(&args, &mut bordered);
            }
            Mode::Grouped { ops, .. } => {
                let channels_g = p.num_input() / p.group;
                let num_output_g = p.num_output / p.group;
                let g_pack = elempack_for(channels_g, precision, opt, &caps);
                let out_g_pack = elempack_for(num_output_g, precision, opt, &caps);
                let input = repack_input(bottom, g_pack, opt)?;

                let mut unpacked = if out_g_pack < out_pack {
                    let m = Mat::new_3d(outw, outh, p.num_output / out_g_pack, lane * out_g_pack, out_g_pack, opt.workspace());
                    if m.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                    m
                } else {
                    std::mem::take(&mut bordered)
                };

                // Each group runs into its own tensor, then lands in its channels.
                let units_g = num_output_g / out_g_pack;
                for (g, op) in ops.iter().enumerate() {
                    let bottom_g = input.channel_range(channels_g * g / g_pack, channels_g / g_pack);
                    let mut top_g = Mat::new_3d(outw, outh, units_g, lane * out_g_pack, out_g_pack, opt.workspace());
                    if top_g.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                    op.forward_into(&bottom_g, &mut top_g, opt)?;
                    unpacked.copy_channels_from(units_g * g, &top_g);
                }

                if out_g_pack < out_pack {
                    let target = if cut { opt.scratch() } else { opt.clone() };
                    bordered = convert_packing(&unpacked, out_pack, &target);
                    if bordered.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                } else {
                    bordered = unpacked;
                }
            }
            Mode::Dynamic(_) => unreachable!("rejected above"),
        }

        cut_padding(p, bordered, precision, opt)
    }

    /// Forward with runtime weights `[input, weight, bias?]`, the weight
    /// tensor shaped `w = kernel_w, h = kernel_h, d = outch / group, c = inch`.
    pub fn forward_dynamic(&self, bottoms: &[Mat], opt: &Options) -> Result<Mat> {
        let caps = match &self.mode {
            Some(Mode::Dynamic(caps)) => *caps,
            _ => return Err(LayerError::NotReady(self.state)),
        };
        let (child, mats) = runtime_weights(&self.params, bottoms, opt, &caps)?;
        let mut op = DeconvolutionDepthWise::load_param(&child.to_dict(Family::Deconvolution))?;
        op.load_model(&mut MatArrayModelBin::new(mats))?;
        op.create_pipeline(opt, &caps)?;
        let out = op.forward(&bottoms[0], opt);
        op.destroy_pipeline();
        out
    }
}
