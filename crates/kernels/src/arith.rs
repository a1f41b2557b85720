// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Numeric modes.
//!
//! Every kernel is generic over an [`Arith`] that fixes the stored lane type
//! and the accumulator. Half-precision arithmetic keeps its accumulator in
//! `f16` and rounds after every multiply-accumulate, exactly like a chain of
//! `fmla .4h` instructions; the storage-only modes widen to `f32`.

use half::{bf16, f16};
use hw_caps::Precision;
use tensor_core::Element;

pub trait Arith: Send + Sync + 'static {
    /// Lane type of activations and weights.
    type Storage: Element;
    /// Lane type of the running sum.
    type Acc: Copy + Send + Sync + Default;

    const PRECISION: Precision;

    fn acc_from_f32(v: f32) -> Self::Acc;

    /// `acc + a * b`.
    fn mla(acc: Self::Acc, a: Self::Storage, b: Self::Storage) -> Self::Acc;

    fn acc_to_f32(acc: Self::Acc) -> f32;

    #[inline(always)]
    fn store(v: f32) -> Self::Storage {
        Self::Storage::from_f32(v)
    }
}

/// `f32` storage and arithmetic.
pub struct Fp32;

/// `f16` storage, `f32` accumulation.
pub struct Fp16s;

/// `f16` storage and accumulation.
pub struct Fp16sa;

/// `bf16` storage, `f32` accumulation.
pub struct Bf16s;

impl Arith for Fp32 {
    type Storage = f32;
    type Acc = f32;
    const PRECISION: Precision = Precision::Fp32;

    #[inline(always)]
    fn acc_from_f32(v: f32) -> f32 {
        v
    }

    #[inline(always)]
    fn mla(acc: f32, a: f32, b: f32) -> f32 {
        acc + a * b
    }

    #[inline(always)]
    fn acc_to_f32(acc: f32) -> f32 {
        acc
    }
}

impl Arith for Fp16s {
    type Storage = f16;
    type Acc = f32;
    const PRECISION: Precision = Precision::Fp16Storage;

    #[inline(always)]
    fn acc_from_f32(v: f32) -> f32 {
        v
    }

    #[inline(always)]
    fn mla(acc: f32, a: f16, b: f16) -> f32 {
        acc + a.to_f32() * b.to_f32()
    }

    #[inline(always)]
    fn acc_to_f32(acc: f32) -> f32 {
        acc
    }
}

impl Arith for Fp16sa {
    type Storage = f16;
    type Acc = f16;
    const PRECISION: Precision = Precision::Fp16Arithmetic;

    #[inline(always)]
    fn acc_from_f32(v: f32) -> f16 {
        f16::from_f32(v)
    }

    #[inline(always)]
    fn mla(acc: f16, a: f16, b: f16) -> f16 {
        // The f16 × f16 product is exact in f32.
        f16::from_f32(acc.to_f32() + a.to_f32() * b.to_f32())
    }

    #[inline(always)]
    fn acc_to_f32(acc: f16) -> f32 {
        acc.to_f32()
    }
}

impl Arith for Bf16s {
    type Storage = bf16;
    type Acc = f32;
    const PRECISION: Precision = Precision::Bf16Storage;

    #[inline(always)]
    fn acc_from_f32(v: f32) -> f32 {
        v
    }

    #[inline(always)]
    fn mla(acc: f32, a: bf16, b: bf16) -> f32 {
        acc + a.to_f32() * b.to_f32()
    }

    #[inline(always)]
    fn acc_to_f32(acc: f32) -> f32 {
        acc
    }
}
