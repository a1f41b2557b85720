// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII owner of a tensor buffer.

use crate::pool::{words_for, PoolInner};
use crate::MemoryError;
use std::sync::Arc;

/// A word-aligned, zero-initialised byte buffer.
///
/// Pooled guards return their words to the originating
/// [`MemoryPool`](crate::MemoryPool) on drop; heap guards (from
/// [`BufferGuard::heap`]) free them.
pub struct BufferGuard {
    /// `Option` so `drop` can move the buffer out.
    data: Option<Vec<u64>>,
    pool: Option<Arc<PoolInner>>,
    size_bytes: usize,
}

impl BufferGuard {
    pub(crate) fn pooled(data: Vec<u64>, pool: Arc<PoolInner>, size_bytes: usize) -> Self {
        Self {
            data: Some(data),
            pool: Some(pool),
            size_bytes,
        }
    }

    /// Allocates an unpooled buffer straight from the system allocator.
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn heap(size_bytes: usize) -> Result<Self, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let words = words_for(size_bytes);
        let mut data = Vec::new();
        data.try_reserve_exact(words)
            .map_err(|_| MemoryError::HeapExhausted {
                requested_bytes: size_bytes,
            })?;
        data.resize(words, 0u64);
        Ok(Self {
            data: Some(data),
            pool: None,
            size_bytes,
        })
    }

    /// Requested size in bytes (the backing words may be slightly larger).
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    fn words(&self) -> &[u64] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(self.words())[..self.size_bytes]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size_bytes;
        match self.data.as_deref_mut() {
            Some(words) => &mut bytemuck::cast_slice_mut(words)[..size],
            None => &mut [],
        }
    }

    /// Raw pointer to the first byte, for shared-storage wrappers that
    /// enforce their own aliasing discipline.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match self.data.as_deref_mut() {
            Some(words) => words.as_mut_ptr().cast::<u8>(),
            None => std::ptr::NonNull::<u64>::dangling().as_ptr().cast::<u8>(),
        }
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if let (Some(buffer), Some(pool)) = (self.data.take(), self.pool.as_ref()) {
            pool.return_buffer(buffer, self.size_bytes);
        }
    }
}

impl std::fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGuard")
            .field("size_bytes", &self.size_bytes)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
