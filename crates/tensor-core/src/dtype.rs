// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scalar lane types a [`Mat`](crate::Mat) can store.

use half::{bf16, f16};

/// Numeric representation of a single lane.
///
/// A `Mat` does not carry its lane type: 16-bit tensors are interpreted as
/// `F16` or `BF16` by whoever created them, following the active `Options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    /// Size of one scalar lane in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    pub fn bits(self) -> usize {
        self.size_bytes() * 8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lane type with lossless widening to `f32`.
pub trait Element:
    bytemuck::Pod + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    const DTYPE: DType;

    fn to_f32(self) -> f32;

    /// Narrows an `f32`; rounding follows [`crate::cast`].
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    /// Truncates to the upper half of the `f32` bit pattern.
    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        bf16::from_bits((v.to_bits() >> 16) as u16)
    }
}
