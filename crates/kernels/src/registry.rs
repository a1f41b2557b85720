// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Capability-indexed kernel table.
//!
//! Every kernel is registered under an [`Isa`] and a [`KernelKey`]. The
//! portable set lives under [`Isa::Scalar`] and covers every key the
//! frontends ask for; the NEON and RVV sets only override the hot entries.
//! Lookups try the requested ISA first and then fall back to the portable
//! entry.

use crate::arith::{Arith, Bf16s, Fp16s, Fp16sa, Fp32};
use crate::conv::conv_packed;
use crate::conv3x3::{conv3x3s1_pack1ton, conv3x3s2_pack1ton};
use crate::convdw::convdw_packed;
use crate::deconv::deconv_packed;
use crate::deconvdw::deconvdw_packed;
use crate::{KernelError, KernelFn};
use hw_caps::{Capabilities, Isa, Precision};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Operation family of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Conv3x3s1,
    Conv3x3s2,
    Conv,
    ConvDepthwise,
    Deconv,
    DeconvDepthwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub op: OpKind,
    pub in_pack: usize,
    pub out_pack: usize,
    pub precision: Precision,
}

impl KernelKey {
    pub fn new(op: OpKind, in_pack: usize, out_pack: usize, precision: Precision) -> Self {
        Self {
            op,
            in_pack,
            out_pack,
            precision,
        }
    }
}

/// A selected kernel and the name it was registered under.
#[derive(Clone, Copy)]
pub struct KernelEntry {
    pub func: KernelFn,
    pub name: &'static str,
    pub isa: Isa,
}

impl std::fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.isa.as_str())
    }
}

#[derive(Default)]
pub struct KernelRegistry {
    entries: HashMap<(Isa, KernelKey), KernelEntry>,
}

static REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();

macro_rules! register_pairs {
    ($reg:expr, $isa:expr, $op:expr, $kernel:ident, $a:ty; $(($i:literal, $o:literal)),+ $(,)?) => {
        $(
            $reg.insert(
                $isa,
                KernelKey::new($op, $i, $o, <$a as Arith>::PRECISION),
                $kernel::<$a, $i, $o>,
                concat!(stringify!($kernel), "<", $i, ",", $o, ">"),
            );
        )+
    };
}

macro_rules! register_packs {
    ($reg:expr, $isa:expr, $op:expr, $kernel:ident, $a:ty; $($p:literal),+ $(,)?) => {
        $(
            $reg.insert(
                $isa,
                KernelKey::new($op, $p, $p, <$a as Arith>::PRECISION),
                $kernel::<$a, $p>,
                concat!(stringify!($kernel), "<", $p, ">"),
            );
        )+
    };
}

fn register_portable<A: Arith>(reg: &mut KernelRegistry) {
    let p = A::PRECISION;
    reg.insert(Isa::Scalar, KernelKey::new(OpKind::Conv3x3s1, 1, 4, p), conv3x3s1_pack1ton::<A, 4>, "conv3x3s1_pack1to4");
    reg.insert(Isa::Scalar, KernelKey::new(OpKind::Conv3x3s1, 1, 8, p), conv3x3s1_pack1ton::<A, 8>, "conv3x3s1_pack1to8");
    reg.insert(Isa::Scalar, KernelKey::new(OpKind::Conv3x3s2, 1, 4, p), conv3x3s2_pack1ton::<A, 4>, "conv3x3s2_pack1to4");
    reg.insert(Isa::Scalar, KernelKey::new(OpKind::Conv3x3s2, 1, 8, p), conv3x3s2_pack1ton::<A, 8>, "conv3x3s2_pack1to8");
    register_pairs!(reg, Isa::Scalar, OpKind::Conv, conv_packed, A;
        (1, 1), (1, 4), (1, 8), (4, 1), (4, 4), (4, 8), (8, 1), (8, 4), (8, 8));
    register_pairs!(reg, Isa::Scalar, OpKind::Deconv, deconv_packed, A;
        (1, 1), (1, 4), (1, 8), (4, 1), (4, 4), (4, 8), (8, 1), (8, 4), (8, 8));
    register_packs!(reg, Isa::Scalar, OpKind::ConvDepthwise, convdw_packed, A; 1, 4, 8);
    register_packs!(reg, Isa::Scalar, OpKind::DeconvDepthwise, deconvdw_packed, A; 1, 4, 8);
}

impl KernelRegistry {
    /// The process-wide table, built on first use.
    pub fn global() -> &'static KernelRegistry {
        REGISTRY.get_or_init(KernelRegistry::with_builtin)
    }

    /// A table holding every built-in kernel.
    pub fn with_builtin() -> Self {
        let mut reg = Self::default();
        register_portable::<Fp32>(&mut reg);
        register_portable::<Fp16s>(&mut reg);
        register_portable::<Fp16sa>(&mut reg);
        register_portable::<Bf16s>(&mut reg);
        #[cfg(target_arch = "aarch64")]
        crate::neon::register(&mut reg);
        crate::rvv::register(&mut reg);
        tracing::debug!(entries = reg.len(), "kernel registry built");
        reg
    }

    pub fn insert(&mut self, isa: Isa, key: KernelKey, func: KernelFn, name: &'static str) {
        self.entries.insert((isa, key), KernelEntry { func, name, isa });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `key` under `isa`, else the portable entry.
    pub fn lookup(&self, isa: Isa, key: KernelKey) -> Result<KernelEntry, KernelError> {
        self.entries
            .get(&(isa, key))
            .or_else(|| self.entries.get(&(Isa::Scalar, key)))
            .copied()
            .ok_or(KernelError::Unsupported {
                op: key.op,
                in_pack: key.in_pack,
                out_pack: key.out_pack,
                precision: key.precision,
                isa,
            })
    }

    /// Lookup for the ISA of `caps`.
    pub fn resolve(&self, caps: &Capabilities, key: KernelKey) -> Result<KernelEntry, KernelError> {
        let entry = self.lookup(caps.isa, key)?;
        tracing::debug!(kernel = ?entry, precision = key.precision.as_str(), "kernel selected");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_coverage() {
        let reg = KernelRegistry::with_builtin();
        for p in [Precision::Fp32, Precision::Fp16Storage, Precision::Fp16Arithmetic, Precision::Bf16Storage] {
            for (i, o) in [(1, 1), (1, 4), (4, 8), (8, 8)] {
                assert!(reg.lookup(Isa::Scalar, KernelKey::new(OpKind::Conv, i, o, p)).is_ok());
                assert!(reg.lookup(Isa::Scalar, KernelKey::new(OpKind::Deconv, i, o, p)).is_ok());
            }
            assert!(reg.lookup(Isa::Scalar, KernelKey::new(OpKind::Conv3x3s2, 1, 8, p)).is_ok());
            assert!(reg.lookup(Isa::Scalar, KernelKey::new(OpKind::DeconvDepthwise, 4, 4, p)).is_ok());
        }
    }

    #[test]
    fn test_fallback_to_portable() {
        let reg = KernelRegistry::global();
        let key = KernelKey::new(OpKind::Conv, 4, 1, Precision::Fp32);
        let entry = reg.lookup(Isa::Neon, key).unwrap();
        assert_eq!(entry.isa, Isa::Scalar);
        assert_eq!(entry.name, "conv_packed<4,1>");
    }

    #[test]
    fn test_unsupported_key() {
        let reg = KernelRegistry::global();
        let key = KernelKey::new(OpKind::Conv3x3s1, 4, 4, Precision::Fp32);
        let err = reg.lookup(Isa::Rvv, key).unwrap_err();
        assert!(matches!(err, KernelError::Unsupported { in_pack: 4, isa: Isa::Rvv, .. }));
        assert!(err.to_string().contains("fp32"));
    }

    #[test]
    fn test_rvv_override_present() {
        let caps = Capabilities::portable().with_isa(Isa::Rvv).with_fp16_storage(true);
        let key = KernelKey::new(OpKind::DeconvDepthwise, 8, 8, Precision::Fp16Storage);
        let entry = KernelRegistry::global().resolve(&caps, key).unwrap();
        assert_eq!(entry.isa, Isa::Rvv);
    }
}
