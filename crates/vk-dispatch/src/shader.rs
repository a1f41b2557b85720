// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shader identities and workgroup sizing.
//!
//! Every compute shader is named by a fixed integer tag. The tags are part
//! of the pipeline cache key, so they never change once assigned.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ShaderType {
    Slice = 100,
    SlicePack4 = 101,
    SlicePack1to4 = 102,
    SlicePack8 = 103,
    SlicePack1to8 = 104,
    SlicePack4to8 = 105,
    PackingPack1to4 = 200,
    PackingPack4to1 = 201,
    PackingPack1to8 = 202,
    PackingPack8to1 = 203,
    PackingPack4to8 = 204,
    PackingPack8to4 = 205,
}

impl ShaderType {
    pub const ALL: [ShaderType; 12] = [
        ShaderType::Slice,
        ShaderType::SlicePack4,
        ShaderType::SlicePack1to4,
        ShaderType::SlicePack8,
        ShaderType::SlicePack1to8,
        ShaderType::SlicePack4to8,
        ShaderType::PackingPack1to4,
        ShaderType::PackingPack4to1,
        ShaderType::PackingPack1to8,
        ShaderType::PackingPack8to1,
        ShaderType::PackingPack4to8,
        ShaderType::PackingPack8to4,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<ShaderType> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }

    /// `(source pack, destination pack)` the shader reads and writes.
    pub fn packs(self) -> (usize, usize) {
        match self {
            ShaderType::Slice => (1, 1),
            ShaderType::SlicePack4 => (4, 4),
            ShaderType::SlicePack1to4 => (1, 4),
            ShaderType::SlicePack8 => (8, 8),
            ShaderType::SlicePack1to8 => (1, 8),
            ShaderType::SlicePack4to8 => (4, 8),
            ShaderType::PackingPack1to4 => (1, 4),
            ShaderType::PackingPack4to1 => (4, 1),
            ShaderType::PackingPack1to8 => (1, 8),
            ShaderType::PackingPack8to1 => (8, 1),
            ShaderType::PackingPack4to8 => (4, 8),
            ShaderType::PackingPack8to4 => (8, 4),
        }
    }

    pub fn is_slice(self) -> bool {
        self.tag() < 200
    }

    /// Slice variant reading pack `src` and writing pack `dst`.
    pub fn slice_variant(src: usize, dst: usize) -> Option<ShaderType> {
        Self::ALL[..6].iter().copied().find(|s| s.packs() == (src, dst))
    }

    /// Packing variant converting pack `src` to pack `dst`.
    pub fn packing_variant(src: usize, dst: usize) -> Option<ShaderType> {
        Self::ALL[6..].iter().copied().find(|s| s.packs() == (src, dst))
    }

    /// Length of the push-constant block the shader declares.
    pub fn push_constant_count(self) -> usize {
        if self.is_slice() {
            13
        } else {
            12
        }
    }

    /// Number of storage buffers bound: always source then destination.
    pub fn binding_count(self) -> usize {
        2
    }
}

/// Workgroup dimensions of a compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl LocalSize {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Default shape for a tensor of rank `dims`: 64 for vectors, 8×8 for
    /// matrices and 4×4×4 for anything with channels.
    pub fn for_rank(dims: usize) -> Self {
        match dims {
            1 => Self::new(64, 1, 1),
            2 => Self::new(8, 8, 1),
            _ => Self::new(4, 4, 4),
        }
    }

    pub fn invocations(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// Halves the largest dimension until the group fits `max_invocations`.
    pub fn clamp(mut self, max_invocations: u32) -> Self {
        while self.invocations() > max_invocations.max(1) {
            if self.x >= self.y && self.x >= self.z {
                self.x = (self.x / 2).max(1);
            } else if self.y >= self.z {
                self.y = (self.y / 2).max(1);
            } else {
                self.z = (self.z / 2).max(1);
            }
        }
        self
    }

    /// Workgroup counts covering `w × (h·d) × c` invocations.
    pub fn group_count(&self, w: usize, hd: usize, c: usize) -> [u32; 3] {
        [
            (w as u32).div_ceil(self.x),
            (hd as u32).div_ceil(self.y),
            (c as u32).div_ceil(self.z),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for s in ShaderType::ALL {
            assert_eq!(ShaderType::from_tag(s.tag()), Some(s));
        }
        assert_eq!(ShaderType::from_tag(7), None);
    }

    #[test]
    fn test_variant_lookup() {
        assert_eq!(ShaderType::slice_variant(4, 8), Some(ShaderType::SlicePack4to8));
        assert_eq!(ShaderType::slice_variant(8, 4), None);
        assert_eq!(ShaderType::packing_variant(8, 4), Some(ShaderType::PackingPack8to4));
        assert_eq!(ShaderType::packing_variant(4, 4), None);
    }

    #[test]
    fn test_local_size_by_rank() {
        assert_eq!(LocalSize::for_rank(1), LocalSize::new(64, 1, 1));
        assert_eq!(LocalSize::for_rank(2), LocalSize::new(8, 8, 1));
        assert_eq!(LocalSize::for_rank(4), LocalSize::new(4, 4, 4));
    }

    #[test]
    fn test_clamp_and_groups() {
        assert_eq!(LocalSize::new(4, 4, 4).clamp(32).invocations(), 32);
        assert_eq!(LocalSize::for_rank(3).group_count(9, 4, 5), [3, 1, 2]);
    }
}
