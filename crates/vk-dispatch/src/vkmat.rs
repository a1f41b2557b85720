// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device-resident tensors.

use crate::error::{Result, VkError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tensor_core::Mat;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Geometry {
    dims: usize,
    w: usize,
    h: usize,
    d: usize,
    c: usize,
    elemsize: usize,
    elempack: usize,
    cstep: usize,
}

/// A tensor living in device memory.
///
/// Geometry follows [`Mat`] exactly, including `cstep` alignment. Contents
/// are only reachable on the host through a recorded download, and handles
/// are cheap to clone: clones name the same device buffer. The buffer sits
/// behind a lock that every transfer and dispatch takes, readers shared and
/// the destination exclusive.
#[derive(Clone, Default)]
pub struct VkMat {
    buffer: Option<Arc<RwLock<Mat>>>,
    geometry: Geometry,
}

impl VkMat {
    pub(crate) fn from_buffer(buffer: Mat) -> Self {
        if buffer.is_empty() {
            return Self::default();
        }
        let geometry = Geometry {
            dims: buffer.dims(),
            w: buffer.w(),
            h: buffer.h(),
            d: buffer.d(),
            c: buffer.c(),
            elemsize: buffer.elemsize(),
            elempack: buffer.elempack(),
            cstep: buffer.cstep(),
        };
        Self {
            buffer: Some(Arc::new(RwLock::new(buffer))),
            geometry,
        }
    }

    fn lock(&self) -> Result<&RwLock<Mat>> {
        self.buffer
            .as_deref()
            .ok_or_else(|| VkError::InvalidDispatch("empty device tensor bound".to_string()))
    }

    /// Shared access for transfers and dispatches reading the buffer.
    pub(crate) fn read_buffer(&self) -> Result<RwLockReadGuard<'_, Mat>> {
        self.lock()?
            .read()
            .map_err(|_| VkError::InvalidDispatch(format!("device buffer {self:?} poisoned")))
    }

    /// Exclusive access for the one command writing the buffer.
    pub(crate) fn write_buffer(&self) -> Result<RwLockWriteGuard<'_, Mat>> {
        self.lock()?
            .write()
            .map_err(|_| VkError::InvalidDispatch(format!("device buffer {self:?} poisoned")))
    }

    pub fn dims(&self) -> usize {
        self.geometry.dims
    }

    pub fn w(&self) -> usize {
        self.geometry.w
    }

    pub fn h(&self) -> usize {
        self.geometry.h
    }

    pub fn d(&self) -> usize {
        self.geometry.d
    }

    pub fn c(&self) -> usize {
        self.geometry.c
    }

    pub fn elemsize(&self) -> usize {
        self.geometry.elemsize
    }

    pub fn elempack(&self) -> usize {
        self.geometry.elempack
    }

    pub fn cstep(&self) -> usize {
        self.geometry.cstep
    }

    /// Stored units including inter-plane padding.
    pub fn total(&self) -> usize {
        self.geometry.cstep * self.geometry.c
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_none() || self.total() == 0
    }

    /// Whether both handles name the same device buffer.
    pub fn same_buffer(&self, other: &VkMat) -> bool {
        match (&self.buffer, &other.buffer) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `[dims, w, h, d, c, cstep]` as laid out in push-constant blocks.
    pub fn shape_constants(&self) -> [i32; 6] {
        [
            self.dims() as i32,
            self.w() as i32,
            self.h() as i32,
            self.d() as i32,
            self.c() as i32,
            self.cstep() as i32,
        ]
    }
}

impl std::fmt::Debug for VkMat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkMat")
            .field("dims", &self.dims())
            .field("w", &self.w())
            .field("h", &self.h())
            .field("d", &self.d())
            .field("c", &self.c())
            .field("elemsize", &self.elemsize())
            .field("elempack", &self.elempack())
            .finish()
    }
}
