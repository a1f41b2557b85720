// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Immutable capability facts.

use crate::cpu::{self, CpuFeatures};
use std::fmt;

/// Vector instruction set the CPU kernels can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isa {
    /// Portable code only.
    Scalar,
    /// AArch64 Advanced SIMD.
    Neon,
    /// RISC-V vector extension.
    Rvv,
}

impl Isa {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Neon => "neon",
            Self::Rvv => "rvv",
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric mode of a kernel: how values are stored and accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// `f32` storage and arithmetic.
    Fp32,
    /// `f16` storage, `f32` accumulation.
    Fp16Storage,
    /// `f16` storage and accumulation.
    Fp16Arithmetic,
    /// `bf16` storage, `f32` accumulation.
    Bf16Storage,
}

impl Precision {
    /// Bits per stored scalar.
    pub fn storage_bits(self) -> usize {
        match self {
            Self::Fp32 => 32,
            _ => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16Storage => "fp16s",
            Self::Fp16Arithmetic => "fp16sa",
            Self::Bf16Storage => "bf16s",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executing CPU can do, detected once and handed to every
/// `create_pipeline` call.
///
/// The value is plain data: tests construct it with [`Capabilities::portable`]
/// and the `with_*` builders to exercise any kernel path on any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    pub isa: Isa,
    /// Half-precision tensors can be stored and converted.
    pub fp16_storage: bool,
    /// Half-precision multiply-accumulate is available.
    pub fp16_arithmetic: bool,
    /// bfloat16 tensors can be stored and converted.
    pub bf16_storage: bool,
    /// Vector register length in bytes (0 without a vector ISA).
    pub vlenb: usize,
    pub online_cores: usize,
}

/// Assumed vector length when the CSR cannot be read.
const DEFAULT_VLENB: usize = 16;

impl Capabilities {
    /// Scalar facts: `f32` only, one core.
    pub fn portable() -> Self {
        Self {
            isa: Isa::Scalar,
            fp16_storage: false,
            fp16_arithmetic: false,
            bf16_storage: false,
            vlenb: 0,
            online_cores: 1,
        }
    }

    /// Probes the running system.
    ///
    /// Missing or unreadable sources degrade to the facts implied by the
    /// compile target alone; detection never fails.
    pub fn detect() -> Self {
        let features = CpuFeatures::read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cpu feature detection failed, using target defaults");
            CpuFeatures::default()
        });
        let online_cores = cpu::read_online_cores().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "core count detection failed");
            1
        });
        let caps = Self::from_features(std::env::consts::ARCH, &features, online_cores);
        tracing::info!(%caps, "capabilities detected");
        caps
    }

    /// Derives the facts for `arch` (a `std::env::consts::ARCH` name) from
    /// parsed cpuinfo features.
    pub fn from_features(arch: &str, features: &CpuFeatures, online_cores: usize) -> Self {
        let online_cores = online_cores.max(1);
        match arch {
            // Every AArch64 core converts f16 and bf16 in hardware or with a
            // couple of integer ops; fp16 arithmetic needs ARMv8.2 asimdhp.
            "aarch64" => Self {
                isa: Isa::Neon,
                fp16_storage: true,
                fp16_arithmetic: features.has("asimdhp"),
                bf16_storage: true,
                vlenb: 16,
                online_cores,
            },
            "riscv64" if features.has("v") => {
                let zfh = features.has("zfh") || features.has("zvfh");
                Self {
                    isa: Isa::Rvv,
                    fp16_storage: zfh,
                    fp16_arithmetic: zfh,
                    bf16_storage: false,
                    vlenb: Self::vector_length(),
                    online_cores,
                }
            }
            _ => Self {
                online_cores,
                ..Self::portable()
            },
        }
    }

    #[cfg(target_arch = "riscv64")]
    fn vector_length() -> usize {
        cpu::read_vlenb()
    }

    #[cfg(not(target_arch = "riscv64"))]
    fn vector_length() -> usize {
        DEFAULT_VLENB
    }

    pub fn with_isa(mut self, isa: Isa) -> Self {
        self.isa = isa;
        if isa != Isa::Scalar && self.vlenb == 0 {
            self.vlenb = DEFAULT_VLENB;
        }
        self
    }

    pub fn with_fp16_storage(mut self, on: bool) -> Self {
        self.fp16_storage = on;
        self
    }

    /// Half-precision arithmetic implies half-precision storage.
    pub fn with_fp16_arithmetic(mut self, on: bool) -> Self {
        self.fp16_arithmetic = on;
        self.fp16_storage |= on;
        self
    }

    pub fn with_bf16_storage(mut self, on: bool) -> Self {
        self.bf16_storage = on;
        self
    }

    pub fn with_vlenb(mut self, vlenb: usize) -> Self {
        self.vlenb = vlenb;
        self
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.online_cores = cores.max(1);
        self
    }

    pub fn supports(&self, precision: Precision) -> bool {
        match precision {
            Precision::Fp32 => true,
            Precision::Fp16Storage => self.fp16_storage,
            Precision::Fp16Arithmetic => self.fp16_arithmetic,
            Precision::Bf16Storage => self.bf16_storage,
        }
    }

    /// Widest element pack worth using for `precision` (4 or 8).
    ///
    /// On RVV the natural pack is the number of lanes in one vector register
    /// (`packn`), capped to the supported packs.
    pub fn preferred_pack(&self, precision: Precision) -> usize {
        let lanes = |bytes: usize| if self.vlenb / bytes >= 8 { 8 } else { 4 };
        match (self.isa, precision) {
            (_, Precision::Fp16Arithmetic) => 8,
            (Isa::Rvv, Precision::Fp16Storage) => lanes(2),
            (Isa::Rvv, Precision::Fp32) => lanes(4),
            _ => 4,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::portable()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut extras = Vec::new();
        if self.fp16_storage {
            extras.push("fp16s");
        }
        if self.fp16_arithmetic {
            extras.push("fp16sa");
        }
        if self.bf16_storage {
            extras.push("bf16s");
        }
        write!(f, "{}", self.isa)?;
        if !extras.is_empty() {
            write!(f, " [{}]", extras.join(", "))?;
        }
        if self.vlenb > 0 {
            write!(f, " vlen {}", self.vlenb * 8)?;
        }
        write!(f, ", {} cores", self.online_cores)
    }
}
