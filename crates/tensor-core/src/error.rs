// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor construction and configuration.
//!
//! Layout conversions and casts do not use these: they signal allocation
//! failure by returning an empty [`Mat`](crate::Mat).

/// Errors raised by the fallible host-side constructors and the `Options` loader.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// Host data does not match the requested tensor shape.
    #[error("shape mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Backing storage could not be obtained.
    #[error("tensor allocation failed: {0}")]
    Allocation(#[from] memory_manager::MemoryError),

    /// The configuration file could not be read.
    #[error("cannot read options file '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for [`Options`](crate::Options).
    #[error("invalid options: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("cannot serialise options: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// An allocator budget string in the configuration is malformed.
    #[error("invalid allocator budget for {role}: {source}")]
    Budget {
        role: &'static str,
        #[source]
        source: memory_manager::MemoryError,
    },
}
