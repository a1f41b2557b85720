// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pooled allocator with budget enforcement.
//!
//! A [`MemoryPool`]:
//!
//! 1. refuses allocations that would push live bytes past its budget,
//!    returning `Err(OutOfMemory)`,
//! 2. recycles returned buffers through a free list binned by size class so
//!    that a workspace pool stops touching the system allocator after the
//!    first inference call, and
//! 3. records statistics for profiling.
//!
//! Buffers are vectors of `u64` words, which gives every element type used by
//! the tensors (`f32`, `f16`, `bf16`, `u8`) a correctly aligned view.
//!
//! # Size Classes
//! Returned buffers are binned by the next power of two of their byte size
//! (minimum 4 KiB).

use crate::{AllocationStats, BufferGuard, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimum size class: 4 KiB. Anything smaller is rounded up.
const MIN_SIZE_CLASS: usize = 4096;

const WORD: usize = std::mem::size_of::<u64>();

/// State shared between a pool and the guards it handed out.
pub struct PoolInner {
    label: String,
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    /// size class (bytes) → recycled word buffers of at least that size.
    free_buffers: Mutex<HashMap<usize, Vec<Vec<u64>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    /// Called by `BufferGuard::drop`.
    pub(crate) fn return_buffer(&self, buffer: Vec<u64>, size_bytes: usize) {
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_returned();
        }

        let size_class = size_class_for(size_bytes);
        let held = buffer.len() * WORD;
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(size_class).or_default().push(buffer);
            self.free_list_bytes.fetch_add(held, Ordering::AcqRel);
        }
    }

    /// Atomically reserves `size_bytes` against the budget.
    fn reserve(&self, size_bytes: usize) -> Result<(), MemoryError> {
        let budget = self.budget.as_bytes();
        let mut current = self.allocated_bytes.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(size_bytes);
            if next > budget {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_refused();
                }
                tracing::debug!(
                    pool = %self.label,
                    requested = size_bytes,
                    live = current,
                    "allocation refused by budget"
                );
                return Err(MemoryError::OutOfMemory {
                    requested_bytes: size_bytes,
                    available_bytes: budget.saturating_sub(current),
                    budget_bytes: budget,
                });
            }
            match self.allocated_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Allocator for tensor storage.
///
/// Cloning is cheap: clones share the same budget, free list and statistics.
///
/// # Example
/// ```
/// use memory_manager::{MemoryPool, MemoryBudget};
///
/// let pool = MemoryPool::named("workspace", MemoryBudget::from_mb(8));
/// let guard = pool.allocate(4096).unwrap();
/// assert_eq!(pool.allocated_bytes(), 4096);
/// drop(guard);
/// assert_eq!(pool.allocated_bytes(), 0);
/// assert_eq!(pool.stats().fresh, 1);
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Creates an anonymous pool with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self::named("pool", budget)
    }

    /// Creates a pool whose label shows up in logs and `Debug` output.
    pub fn named(label: impl Into<String>, budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                label: label.into(),
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    /// Allocates a zeroed buffer of `size_bytes`.
    ///
    /// Reuses a free-list buffer of the same size class when one exists.
    pub fn allocate(&self, size_bytes: usize) -> Result<BufferGuard, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        self.inner.reserve(size_bytes)?;

        let words = words_for(size_bytes);
        let size_class = size_class_for(size_bytes);
        let recycled = self.inner.free_buffers.lock().ok().and_then(|mut free| {
            free.get_mut(&size_class).and_then(|bucket| bucket.pop())
        });

        let is_hit = recycled.is_some();
        let data = match recycled {
            Some(mut buf) => {
                self.inner
                    .free_list_bytes
                    .fetch_sub(buf.len() * WORD, Ordering::AcqRel);
                if buf.len() < words {
                    buf.resize(words, 0);
                }
                buf[..words].fill(0);
                buf
            }
            None => {
                let mut buf = Vec::new();
                if buf.try_reserve_exact(words).is_err() {
                    self.inner
                        .allocated_bytes
                        .fetch_sub(size_bytes, Ordering::AcqRel);
                    return Err(MemoryError::HeapExhausted {
                        requested_bytes: size_bytes,
                    });
                }
                buf.resize(words, 0);
                buf
            }
        };

        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_served(is_hit, self.inner.allocated_bytes.load(Ordering::Acquire));
        }

        Ok(BufferGuard::pooled(data, Arc::clone(&self.inner), size_bytes))
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Bytes currently handed out and not yet returned.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Bytes remaining before the budget refuses allocations.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Snapshot of allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Drops every cached free buffer. Live buffers are unaffected.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
        tracing::debug!(pool = %self.inner.label, stats = %self.stats(), "free list cleared");
    }

    /// Bytes parked in the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same pool.
    pub fn same_pool(&self, other: &MemoryPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Number of `u64` words needed to hold `size_bytes`.
pub(crate) fn words_for(size_bytes: usize) -> usize {
    size_bytes.div_ceil(WORD)
}

/// Smallest power of two ≥ `size` and ≥ `MIN_SIZE_CLASS`.
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("label", &self.inner.label)
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish()
    }
}
