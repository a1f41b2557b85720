// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # kernels
//!
//! CPU compute routines over packed [`Mat`](tensor_core::Mat) tensors.
//!
//! Every kernel has the uniform signature [`KernelFn`]: it reads a padded
//! input, pre-laid weights and an `f32` bias from [`KernelArgs`] and fills an
//! output the caller has already allocated. Kernels are generic over an
//! [`arith::Arith`] numeric mode and over the input and output packs.
//!
//! # Kernels
//! - 3×3 stride 1 / stride 2 convolution, pack1 → pack4/pack8.
//! - Generic packed convolution; its pack1 `f32` instance is the reference.
//! - Depthwise convolution at pack 1/4/8.
//! - Transposed convolution, generic and depthwise, in gather form.
//! - Lane-agnostic window copy for slicing.
//!
//! # Selection
//! [`KernelRegistry`] maps `(Isa, KernelKey)` to a kernel. The portable set is
//! always present; NEON and RVV entries override the hot paths and fall back
//! to it.

pub mod arith;

mod activation;
mod args;
mod conv;
mod conv3x3;
mod convdw;
mod deconv;
mod deconvdw;
mod error;
#[cfg(target_arch = "aarch64")]
mod neon;
mod registry;
mod rvv;
mod slice;
mod weights;

pub use activation::Activation;
pub use args::{ConvGeometry, KernelArgs, KernelFn};
pub use conv::conv_packed;
pub use conv3x3::{conv3x3s1_pack1ton, conv3x3s2_pack1ton};
pub use convdw::convdw_packed;
pub use deconv::deconv_packed;
pub use deconvdw::deconvdw_packed;
pub use error::KernelError;
pub use registry::{KernelEntry, KernelKey, KernelRegistry, OpKind};
pub use rvv::deconvdw_packn_rvv;
pub use slice::slice_copy;
pub use weights::{
    flip_taps, pack_conv_weights, pack_depthwise_weights, transpose_deconv_groups, weights_mat,
};
