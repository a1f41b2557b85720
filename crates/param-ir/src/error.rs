// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for parameter parsing and weight loading.

/// Errors raised while reading the text parameter stream or the binary
/// weight stream.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    /// A `key=value` token or layer line is malformed.
    #[error("syntax error in '{token}': {detail}")]
    Syntax { token: String, detail: String },

    /// A parameter key exceeds the per-layer key space.
    #[error("parameter key {key} out of range (max {max})")]
    KeyOutOfRange { key: i32, max: usize },

    /// The layer type tag names no known operator.
    #[error("unknown layer type '{0}'")]
    UnknownLayer(String),

    /// The text stream does not start with the format magic.
    #[error("bad parameter magic {0}")]
    BadMagic(String),

    /// The binary stream ended before a payload was complete.
    #[error("weight stream truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// The payload's quantize tag names a format this core does not read.
    #[error("unsupported quantize tag {0:#010x}")]
    UnsupportedQuantTag(u32),

    /// A [`MatArrayModelBin`](crate::MatArrayModelBin) ran out of tensors.
    #[error("weight list exhausted after {0} tensors")]
    Exhausted(usize),

    /// A loaded payload could not be placed in a tensor.
    #[error("weight tensor: {0}")]
    Tensor(#[from] tensor_core::TensorError),
}
