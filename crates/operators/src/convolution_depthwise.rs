// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Depthwise and grouped convolution frontend.
//!
//! With `channels == group == num_output` every channel has its own kernel
//! and the depthwise kernel runs directly. Any other grouping builds one
//! dense [`Convolution`] per group at pipeline creation and, at forward,
//! feeds each one its channel range of the (padded, repacked) input.

use crate::convolution::{make_padding, Convolution};
use crate::error::{LayerError, Result};
use crate::params::{ConvParams, Family};
use crate::pipeline::{
    elempack_for, forward_precision, lane_bytes, pipeline_precision, repack_input, ConvPipeline, PipelineState,
};
use hw_caps::{Capabilities, Precision};
use kernels::{pack_depthwise_weights, weights_mat, KernelArgs, KernelKey, OpKind};
use param_ir::{MatArrayModelBin, ModelBin, ParamDict};
use tensor_core::{convert_packing, Mat, Options};

#[derive(Debug)]
enum Mode {
    Depthwise(ConvPipeline),
    Grouped {
        ops: Vec<Convolution>,
        precision: Precision,
        caps: Capabilities,
    },
}

#[derive(Debug)]
pub struct ConvolutionDepthWise {
    pub params: ConvParams,
    weight_data: Option<Mat>,
    bias_data: Vec<f32>,
    mode: Option<Mode>,
    state: PipelineState,
}

impl ConvolutionDepthWise {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        Ok(Self {
            params: ConvParams::load(pd, Family::Convolution)?,
            weight_data: None,
            bias_data: Vec::new(),
            mode: None,
            state: PipelineState::Unconfigured,
        })
    }

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

    /// Whether every channel is convolved on its own.
    pub fn is_depthwise(&self) -> bool {
        let p = &self.params;
        p.num_input() == p.group && p.group == p.num_output
    }

    pub fn create_pipeline(&mut self, opt: &Options, caps: &Capabilities) -> Result<()> {
        let weights = self
            .weight_data
            .as_ref()
            .ok_or(LayerError::MissingWeights("convolution depthwise"))?;
        let raw = weights.to_vec_f32();
        let precision = pipeline_precision(opt, caps);
        let p = &self.params;
        let maxk = p.maxk();

        let mode = if self.is_depthwise() {
            let channels = p.group;
            let pack = elempack_for(channels, precision, opt, caps);
            let kernel =
                ConvPipeline::resolve_kernel(caps, KernelKey::new(OpKind::ConvDepthwise, pack, pack, precision))?;
            let relaid = pack_depthwise_weights(&raw, channels, maxk, pack);
            tracing::info!(kernel = kernel.name, channels, "depthwise convolution pipeline created");
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
                weight_data_size: block,
                group: 1,
                ..p.clone()
            }
            .to_dict(Family::Convolution);

            let mut ops = Vec::with_capacity(p.group);
            for g in 0..p.group {
                let mut mats = vec![Mat::from_f32_1d(block, &raw[g * block..(g + 1) * block])?];
                if p.bias_term {
                    let b = &self.bias_data[g * num_output_g..(g + 1) * num_output_g];
                    mats.push(Mat::from_f32_1d(num_output_g, b)?);
                }
                let mut op = Convolution::load_param(&child)?;
                op.load_model(&mut MatArrayModelBin::new(mats))?;
                op.create_pipeline(opt, caps)?;
                ops.push(op);
            }
            tracing::info!(group = p.group, channels_g, num_output_g, "grouped convolution pipeline created");
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
            Some(Mode::Grouped { mut ops, .. }) => ops.iter_mut().for_each(Convolution::destroy_pipeline),
            Some(Mode::Depthwise(_)) => {}
            None => return,
        }
        tracing::info!("convolution depthwise pipeline destroyed");
        self.state = PipelineState::Destroyed;
    }

    pub fn forward(&self, bottom: &Mat, opt: &Options) -> Result<Mat> {
        let mode = self.mode.as_ref().ok_or(LayerError::NotReady(self.state))?;
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let p = &self.params;
        if bottom.dims() != 3 || bottom.c() * bottom.elempack() != p.num_input() {
            return Err(LayerError::InvalidInput(format!(
                "expected {} input channels, got {bottom:?}",
                p.num_input()
            )));
        }

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
        };

        let padded = make_padding(p, bottom, precision, opt)?;
        let (outw, outh) = p.geometry().conv_output(padded.w(), padded.h()).ok_or_else(|| {
            LayerError::InvalidInput(format!("{bottom:?} is smaller than the kernel window"))
        })?;
        let lane = lane_bytes(precision);
        let out_pack = elempack_for(p.num_output, precision, opt, &caps);
        let mut top = Mat::new_3d(outw, outh, p.num_output / out_pack, lane * out_pack, out_pack, opt.blob());
        if top.is_empty() {
            return Err(LayerError::Allocation);
        }

        match mode {
            Mode::Depthwise(pipeline) => {
                let input = repack_input(&padded, pipeline.in_pack, opt)?;
                let args = KernelArgs {
                    input: &input,
                    weights: &pipeline.weights,
                    bias: &self.bias_data,
                    geometry: p.geometry(),
                    activation: p.activation(),
                    num_threads: opt.resolve_threads(),
                };
                (pipeline.kernel.func)(&args, &mut top);
                Ok(top)
            }
            Mode::Grouped { ops, .. } => {
                let channels_g = p.num_input() / p.group;
                let num_output_g = p.num_output / p.group;
                let g_pack = elempack_for(channels_g, precision, opt, &caps);
                let out_g_pack = elempack_for(num_output_g, precision, opt, &caps);
                let input = repack_input(&padded, g_pack, opt)?;

                let mut unpacked = if out_g_pack < out_pack {
                    let m = Mat::new_3d(outw, outh, p.num_output / out_g_pack, lane * out_g_pack, out_g_pack, opt.workspace());
                    if m.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                    m
                } else {
                    std::mem::take(&mut top)
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
                    top = convert_packing(&unpacked, out_pack, opt);
                    if top.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                } else {
                    top = unpacked;
                }
                Ok(top)
            }
        }
    }
}
