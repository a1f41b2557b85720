// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compiled compute pipelines.

use crate::shader::{LocalSize, ShaderType};

/// A shader bound to its specialization constants and workgroup shape.
///
/// Specialization constants are fixed for the pipeline's lifetime. A zero
/// shape constant means "not known at creation"; the shader then reads the
/// same field from the push-constant block at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub shader: ShaderType,
    pub specializations: Vec<i32>,
    pub local_size: LocalSize,
}

impl Pipeline {
    pub fn new(shader: ShaderType, specializations: Vec<i32>, local_size: LocalSize) -> Self {
        Self {
            shader,
            specializations,
            local_size,
        }
    }

    pub fn binding_count(&self) -> usize {
        self.shader.binding_count()
    }

    pub fn push_constant_count(&self) -> usize {
        self.shader.push_constant_count()
    }

    /// Specialization `id`, or 0 when the pipeline declares fewer.
    pub fn specialization(&self, id: usize) -> i32 {
        self.specializations.get(id).copied().unwrap_or(0)
    }
}

/// Shape resolved the way shaders do it: a non-zero specialization wins,
/// otherwise the push constant supplies the value.
#[inline]
pub(crate) fn psc(specialization: i32, push: i32) -> i32 {
    if specialization != 0 {
        specialization
    } else {
        push
    }
}
