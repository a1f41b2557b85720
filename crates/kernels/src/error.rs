// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for kernel selection.

use crate::registry::OpKind;
use hw_caps::{Isa, Precision};

/// Kernels themselves never fail; only choosing one can.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// No entry for the key under the requested ISA nor the portable set.
    #[error("no {op:?} kernel for pack{in_pack} -> pack{out_pack} {} on {isa:?}", precision.as_str())]
    Unsupported {
        op: OpKind,
        in_pack: usize,
        out_pack: usize,
        precision: Precision,
        isa: Isa,
    },
}
