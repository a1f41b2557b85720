// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Budget-enforced pooled allocator for tensor storage.
//!
//! The compute core distinguishes two allocator roles:
//!
//! - the **blob** allocator, which backs operator outputs whose lifetime
//!   extends past a `forward` call, and
//! - the **workspace** allocator, which backs scratch tensors (padded or
//!   unpacked intermediates) and is expected to recycle memory call after call.
//!
//! Both roles are served by the same [`MemoryPool`] type; the role is just the
//! slot an `Options` value puts a pool into.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a hard ceiling with human-readable parsing
//!   (`"512M"`, `"1G"`).
//! - [`MemoryPool`]: enforces the budget, keeps a free list binned by size
//!   class and tracks statistics.
//! - [`BufferGuard`]: RAII owner of a word-aligned buffer. Pooled guards hand
//!   their buffer back on drop; heap guards simply free it.
//! - [`AllocationStats`]: reuse, refusal and peak-usage counters.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryPool::allocate(size)          BufferGuard::heap(size)
//!       │                                   │
//!       ▼                                   ▼
//!   BufferGuard ◄── owns Vec<u64>, optional Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::return_buffer() ──► free list   (pooled guards only)
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{MemoryPool, MemoryBudget};
//!
//! let pool = MemoryPool::new(MemoryBudget::from_mb(64));
//!
//! let a = pool.allocate(1024 * 1024).unwrap();
//! let b = pool.allocate(512 * 1024).unwrap();
//! assert_eq!(pool.allocated_bytes(), 1024 * 1024 + 512 * 1024);
//!
//! drop(a);
//! assert_eq!(pool.allocated_bytes(), 512 * 1024);
//! # drop(b);
//! ```

mod budget;
mod error;
mod guard;
pub mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::BufferGuard;
pub use pool::MemoryPool;
pub use stats::AllocationStats;
