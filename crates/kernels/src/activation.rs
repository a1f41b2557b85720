// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activations fused into the kernel epilogue.
//!
//! Numbering follows the parameter format: `0` none, `1` relu, `2` leaky
//! relu, `3` clip, `4` sigmoid, `5` mish, `6` hardswish. The activation is
//! applied after bias and accumulation, in `f32`, just before the store.

/// A fused activation with its parameters resolved.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    LeakyRelu {
        slope: f32,
    },
    Clip {
        min: f32,
        max: f32,
    },
    Sigmoid,
    Mish,
    HardSwish {
        alpha: f32,
        beta: f32,
    },
}

impl Activation {
    /// Resolves an activation type tag and its parameter array.
    ///
    /// Unknown tags and missing parameters fall back to a best-effort
    /// default with a warning.
    pub fn from_params(kind: i32, params: &[f32]) -> Self {
        let param = |i: usize, default: f32| params.get(i).copied().unwrap_or(default);
        match kind {
            0 => Self::Identity,
            1 => Self::Relu,
            2 => Self::LeakyRelu {
                slope: param(0, 0.0),
            },
            3 => Self::Clip {
                min: param(0, f32::MIN),
                max: param(1, f32::MAX),
            },
            4 => Self::Sigmoid,
            5 => Self::Mish,
            6 => Self::HardSwish {
                alpha: param(0, 0.2),
                beta: param(1, 0.5),
            },
            other => {
                tracing::warn!(activation_type = other, "unknown activation type, using identity");
                Self::Identity
            }
        }
    }

    /// The numeric type tag of this activation.
    pub fn kind(&self) -> i32 {
        match self {
            Self::Identity => 0,
            Self::Relu => 1,
            Self::LeakyRelu { .. } => 2,
            Self::Clip { .. } => 3,
            Self::Sigmoid => 4,
            Self::Mish => 5,
            Self::HardSwish { .. } => 6,
        }
    }

    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Self::Identity => v,
            Self::Relu => v.max(0.0),
            Self::LeakyRelu { slope } => {
                if v < 0.0 {
                    v * slope
                } else {
                    v
                }
            }
            Self::Clip { min, max } => v.max(min).min(max),
            Self::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            Self::Mish => v * v.exp().ln_1p().tanh(),
            Self::HardSwish { alpha, beta } => v * (v * alpha + beta).clamp(0.0, 1.0),
        }
    }
}
