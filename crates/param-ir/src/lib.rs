// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # param-ir
//!
//! The core's view of the two-file model format: a text stream of layer
//! declarations and a binary stream of weight payloads.
//!
//! - [`ParamDict`]: the `key=value` attributes of one layer, including the
//!   negative-key array convention and the [`AUTO_PAD`] sentinel.
//! - [`LayerType`] / [`LayerDecl`]: the closed set of operator tags and one
//!   parsed layer line.
//! - [`ModelBin`]: sequential weight readers over a byte stream
//!   ([`DataReaderModelBin`]) or over tensors already in memory
//!   ([`MatArrayModelBin`]).
//!
//! Files are never opened here; callers hand in text and bytes.
//!
//! # Example
//! ```
//! use param_ir::{LayerDecl, LayerType, AUTO_PAD};
//!
//! let decl = LayerDecl::parse("Deconvolution up 1 1 x y 0=8 1=4 3=2 4=-233 6=128").unwrap();
//! assert_eq!(decl.layer_type, LayerType::Deconvolution);
//! assert_eq!(decl.params.get_int(4, 0), AUTO_PAD);
//! ```

mod dict;
mod error;
mod layer;
mod modelbin;

pub use dict::{ParamDict, ParamValue, AUTO_PAD, MAX_PARAM_COUNT, SAME_LOWER_PAD};
pub use error::ParamError;
pub use layer::{LayerDecl, LayerType, PARAM_MAGIC};
pub use modelbin::{DataReaderModelBin, MatArrayModelBin, ModelBin, TAG_FP16, TAG_FP32, TAG_INT8};
