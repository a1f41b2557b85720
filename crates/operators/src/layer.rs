// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The closed set of CPU operators, built from a parsed layer line.
//!
//! ```text
//! LayerDecl ──from_decl──▶ Layer (Unconfigured)
//!                            │  .create_pipeline()
//!                            ▼
//!                          Layer (Created) ──.forward()──▶ tops
//!                            │  .destroy_pipeline()
//!                            ▼
//!                          Layer (Destroyed)
//! ```

use crate::error::{LayerError, Result};
use crate::{Convolution, ConvolutionDepthWise, Deconvolution, DeconvolutionDepthWise, PipelineState, Slice};
use hw_caps::Capabilities;
use param_ir::{LayerDecl, LayerType, ModelBin, ParamDict};
use tensor_core::{Mat, Options};

#[derive(Debug)]
pub enum Layer {
    Convolution(Convolution),
    ConvolutionDepthWise(ConvolutionDepthWise),
    Deconvolution(Deconvolution),
    DeconvolutionDepthWise(DeconvolutionDepthWise),
    Slice(Slice),
}

impl Layer {
    /// Builds an operator from its type, parameters and weights.
    pub fn new(layer_type: LayerType, pd: &ParamDict, mb: &mut dyn ModelBin) -> Result<Self> {
        let layer = match layer_type {
            LayerType::Convolution => {
                let mut op = Convolution::load_param(pd)?;
                op.load_model(mb)?;
                Layer::Convolution(op)
            }
            LayerType::ConvolutionDepthWise => {
                let mut op = ConvolutionDepthWise::load_param(pd)?;
                op.load_model(mb)?;
                Layer::ConvolutionDepthWise(op)
            }
            LayerType::Deconvolution => {
                let mut op = Deconvolution::load_param(pd)?;
                op.load_model(mb)?;
                Layer::Deconvolution(op)
            }
            LayerType::DeconvolutionDepthWise => {
                let mut op = DeconvolutionDepthWise::load_param(pd)?;
                op.load_model(mb)?;
                Layer::DeconvolutionDepthWise(op)
            }
            LayerType::Slice => Layer::Slice(Slice::load_param(pd)?),
        };
        Ok(layer)
    }

    /// Builds the operator a layer line declares and checks its blob counts.
    pub fn from_decl(decl: &LayerDecl, mb: &mut dyn ModelBin) -> Result<Self> {
        let layer = Self::new(decl.layer_type, &decl.params, mb)?;
        let (bottoms, tops) = (decl.bottoms.len(), decl.tops.len());
        let expected = match &layer {
            Layer::Slice(op) => (1, op.num_outputs()),
            _ if layer.takes_runtime_weights() => (bottoms.max(2), 1),
            _ => (1, 1),
        };
        if (bottoms, tops) != expected {
            return Err(LayerError::InvalidParam(format!(
                "{} '{}' declares {bottoms} bottoms and {tops} tops, expected {} and {}",
                decl.layer_type, decl.name, expected.0, expected.1
            )));
        }
        tracing::debug!(layer = %decl.layer_type, name = %decl.name, "layer loaded");
        Ok(layer)
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            Layer::Convolution(_) => LayerType::Convolution,
            Layer::ConvolutionDepthWise(_) => LayerType::ConvolutionDepthWise,
            Layer::Deconvolution(_) => LayerType::Deconvolution,
            Layer::DeconvolutionDepthWise(_) => LayerType::DeconvolutionDepthWise,
            Layer::Slice(_) => LayerType::Slice,
        }
    }

    /// Slice holds no pipeline and is always ready.
    pub fn state(&self) -> PipelineState {
        match self {
            Layer::Convolution(op) => op.state(),
            Layer::ConvolutionDepthWise(op) => op.state(),
            Layer::Deconvolution(op) => op.state(),
            Layer::DeconvolutionDepthWise(op) => op.state(),
            Layer::Slice(_) => PipelineState::Created,
        }
    }

    fn takes_runtime_weights(&self) -> bool {
        match self {
            Layer::Deconvolution(op) => op.params.dynamic_weight,
            Layer::DeconvolutionDepthWise(op) => op.params.dynamic_weight,
            _ => false,
        }
    }

    pub fn create_pipeline(&mut self, opt: &Options, caps: &Capabilities) -> Result<()> {
        match self {
            Layer::Convolution(op) => op.create_pipeline(opt, caps),
            Layer::ConvolutionDepthWise(op) => op.create_pipeline(opt, caps),
            Layer::Deconvolution(op) => op.create_pipeline(opt, caps),
            Layer::DeconvolutionDepthWise(op) => op.create_pipeline(opt, caps),
            Layer::Slice(_) => Ok(()),
        }
    }

    pub fn destroy_pipeline(&mut self) {
        match self {
            Layer::Convolution(op) => op.destroy_pipeline(),
            Layer::ConvolutionDepthWise(op) => op.destroy_pipeline(),
            Layer::Deconvolution(op) => op.destroy_pipeline(),
            Layer::DeconvolutionDepthWise(op) => op.destroy_pipeline(),
            Layer::Slice(_) => {}
        }
    }

    /// Runs the operator. Runtime-weight layers read `[input, weight, bias?]`;
    /// every other layer reads one input.
    pub fn forward(&self, bottoms: &[Mat], opt: &Options) -> Result<Vec<Mat>> {
        if self.takes_runtime_weights() {
            let top = match self {
                Layer::Deconvolution(op) => op.forward_dynamic(bottoms, opt)?,
                Layer::DeconvolutionDepthWise(op) => op.forward_dynamic(bottoms, opt)?,
                _ => unreachable!("only deconvolutions take runtime weights"),
            };
            return Ok(vec![top]);
        }

        let [bottom] = bottoms else {
            return Err(LayerError::InvalidInput(format!(
                "{} takes one input, got {}",
                self.layer_type(),
                bottoms.len()
            )));
        };
        match self {
            Layer::Convolution(op) => Ok(vec![op.forward(bottom, opt)?]),
            Layer::ConvolutionDepthWise(op) => Ok(vec![op.forward(bottom, opt)?]),
            Layer::Deconvolution(op) => Ok(vec![op.forward(bottom, opt)?]),
            Layer::DeconvolutionDepthWise(op) => Ok(vec![op.forward(bottom, opt)?]),
            Layer::Slice(op) => op.forward(bottom, opt),
        }
    }
}
