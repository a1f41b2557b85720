// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Packed tensors and the layout helpers every kernel and operator builds on.
//!
//! This crate provides:
//! - [`Mat`]: a reference-counted tensor of rank 1–4 whose stored units
//!   interleave 1, 4 or 8 scalar lanes, with zero-copy channel views.
//! - [`convert_packing`]: re-lays a tensor to another element pack.
//! - Precision casts between `f32`, `f16` and `bf16`.
//! - [`copy_make_border`] / [`copy_cut_border`] for padding and trimming.
//! - [`Options`]: the per-call configuration (threads, precision flags,
//!   blob and workspace allocators).
//! - [`parallel`]: the fork-join helper used by every channel-parallel loop.
//!
//! # Design Goals
//! - Views never copy; reshaping contiguous data never copies.
//! - Allocation failure yields the empty tensor instead of panicking.
//! - Lane types are chosen by the caller; a `Mat` carries only byte sizes.

mod border;
mod cast;
mod dtype;
mod error;
mod mat;
mod option;
mod packing;
pub mod parallel;

pub use border::{copy_cut_border, copy_make_border};
pub use cast::{
    cast_bfloat16_to_float32, cast_float16_to_float32, cast_float32_to_bfloat16,
    cast_float32_to_float16,
};
pub use dtype::{DType, Element};
pub use error::TensorError;
pub use mat::Mat;
pub use option::Options;
pub use packing::convert_packing;

pub use half::{bf16, f16};
