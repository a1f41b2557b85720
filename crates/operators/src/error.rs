// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for operator frontends.

use crate::PipelineState;
use hw_caps::Precision;
use vk_dispatch::ALLOCATION_FAILED;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// An output or scratch tensor could not be allocated, or the input
    /// was empty.
    #[error("tensor allocation failed")]
    Allocation,

    /// Parameters that no pipeline can be built from.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Input geometry the operator cannot consume.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The input's storage precision differs from the one the pipeline
    /// prepared weights for.
    #[error("pipeline prepared for {} but input selects {}", pipeline.as_str(), input.as_str())]
    PrecisionMismatch { pipeline: Precision, input: Precision },

    #[error("operation needs a created pipeline, layer is {0:?}")]
    NotReady(PipelineState),

    /// Original weights were released in light mode.
    #[error("weights for '{0}' are no longer available")]
    MissingWeights(&'static str),

    #[error(transparent)]
    Unsupported(#[from] kernels::KernelError),

    #[error(transparent)]
    Param(#[from] param_ir::ParamError),

    #[error(transparent)]
    Device(#[from] vk_dispatch::VkError),

    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),
}

impl LayerError {
    /// Numeric status: `-100` for allocation failure, `-1` otherwise.
    pub fn code(&self) -> i32 {
        match self {
            LayerError::Allocation => ALLOCATION_FAILED,
            LayerError::Device(e) => e.code(),
            LayerError::Tensor(tensor_core::TensorError::Allocation(_)) => ALLOCATION_FAILED,
            _ => -1,
        }
    }
}

pub type Result<T> = std::result::Result<T, LayerError>;
