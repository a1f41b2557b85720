// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device-side work.

use crate::shader::ShaderType;
use tensor_core::TensorError;

/// Status code reported for a failed device or blob allocation.
pub const ALLOCATION_FAILED: i32 = -100;

#[derive(Debug, thiserror::Error)]
pub enum VkError {
    /// A device buffer could not be obtained from the device heap.
    #[error("device allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// Dispatch recorded against a shader the device cannot run.
    #[error("no device shader for {0:?}")]
    UnknownShader(ShaderType),

    /// Bindings or push constants do not match the pipeline layout.
    #[error("{shader:?} expects {expected} {what}, got {actual}")]
    Layout {
        shader: ShaderType,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Bound tensors disagree with the shape the shader was asked to walk.
    #[error("invalid dispatch: {0}")]
    InvalidDispatch(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl VkError {
    /// Numeric status in the layer-protocol convention.
    pub fn code(&self) -> i32 {
        match self {
            VkError::Allocation { .. } => ALLOCATION_FAILED,
            _ => -1,
        }
    }
}

pub type Result<T> = std::result::Result<T, VkError>;
