// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for capability probing.

/// Errors that can occur while reading CPU facts from the system.
///
/// None of these escape [`crate::Capabilities::detect`], which degrades to
/// conservative defaults; they surface through the lower-level readers.
#[derive(Debug, thiserror::Error)]
pub enum CapsError {
    /// Failed to read a sysfs or procfs file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    /// A system file did not have the expected format.
    #[error("failed to parse {path}: {detail}")]
    ParseError { path: String, detail: String },

    /// The queried path does not exist on this system.
    #[error("capability source not found: {path}")]
    NotAvailable { path: String },
}
