// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # operators
//!
//! Layer frontends over the `kernels` and `vk-dispatch` crates.
//!
//! Each operator owns its parameters and weights and moves through one
//! lifecycle:
//! ```text
//! load_param → load_model → create_pipeline → forward* → destroy_pipeline
//! ```
//! `create_pipeline` fixes the precision (fp32, fp16 storage, fp16
//! arithmetic or bf16 storage) and the element packs from [`Options`] and
//! the hardware [`Capabilities`], relays the weights once and binds a
//! kernel. `forward` checks that the input's storage matches, pads, runs
//! the kernel or the per-group children, and trims.
//!
//! Failures carry a numeric [`LayerError::code`]: `-100` when a tensor
//! could not be allocated (an empty input counts), `-1` otherwise.
//!
//! [`Options`]: tensor_core::Options
//! [`Capabilities`]: hw_caps::Capabilities

mod convolution;
mod convolution_depthwise;
mod deconvolution;
mod deconvolution_depthwise;
mod error;
mod layer;
mod params;
mod pipeline;
mod slice;
mod slice_vulkan;

pub use convolution::Convolution;
pub use convolution_depthwise::ConvolutionDepthWise;
pub use deconvolution::Deconvolution;
pub use deconvolution_depthwise::DeconvolutionDepthWise;
pub use error::{LayerError, Result};
pub use layer::Layer;
pub use params::{ConvParams, Family};
pub use pipeline::{elempack_for, forward_precision, pipeline_precision, PipelineState};
pub use slice::Slice;
pub use slice_vulkan::{ShapeHint, SliceVulkan};
