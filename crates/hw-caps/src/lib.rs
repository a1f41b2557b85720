// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # hw-caps
//!
//! Reads CPU facts from `/proc/` and `/sys/` once and exposes them as an
//! immutable [`Capabilities`] value that callers pass to every
//! `create_pipeline` call.
//!
//! # Probed Facts
//! - **ISA**: NEON on AArch64, RVV on RISC-V cores with the `v` extension.
//! - **fp16 storage / arithmetic**: `asimdhp` on ARM, `zfh` on RISC-V.
//! - **bf16 storage**: AArch64.
//! - **Vector length**: the `vlenb` CSR on RISC-V.
//! - **Online cores**: `/sys/devices/system/cpu/online`.
//!
//! # Graceful Degradation
//! Outside Linux, or in containers that hide the files, detection falls
//! back to the facts implied by the compile target.
//!
//! # Example
//! ```
//! use hw_caps::{Capabilities, Precision};
//!
//! let caps = Capabilities::detect();
//! let pack = caps.preferred_pack(Precision::Fp32);
//! assert!(pack == 4 || pack == 8);
//! ```

mod caps;
mod cpu;
mod error;

pub use caps::{Capabilities, Isa, Precision};
pub use cpu::CpuFeatures;
pub use error::CapsError;
