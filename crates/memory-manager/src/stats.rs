// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Counters kept by a [`MemoryPool`](crate::MemoryPool).
//!
//! A workspace pool sized for its network reuses nearly every buffer after
//! the first `forward`; a blob pool mostly allocates fresh.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Requests served, refused ones included.
    pub requests: u64,
    /// Requests served from the free list.
    pub reused: u64,
    /// Requests that needed a new heap buffer.
    pub fresh: u64,
    /// Requests refused by the budget.
    pub refused: u64,
    /// Buffers handed back by dropped tensors.
    pub returned: u64,
    /// High-water mark of live bytes.
    pub peak_bytes: usize,
}

impl AllocationStats {
    /// Fraction of served requests that reused a buffer, `0.0` before any.
    pub fn reuse_ratio(&self) -> f64 {
        let served = self.reused + self.fresh;
        if served == 0 {
            0.0
        } else {
            self.reused as f64 / served as f64
        }
    }

    pub(crate) fn record_served(&mut self, reused: bool, live_bytes: usize) {
        self.requests += 1;
        if reused {
            self.reused += 1;
        } else {
            self.fresh += 1;
        }
        self.peak_bytes = self.peak_bytes.max(live_bytes);
    }

    pub(crate) fn record_refused(&mut self) {
        self.requests += 1;
        self.refused += 1;
    }

    pub(crate) fn record_returned(&mut self) {
        self.returned += 1;
    }
}

impl fmt::Display for AllocationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests ({} reused, {} fresh, {} refused), peak {} B, {} returned",
            self.requests, self.reused, self.fresh, self.refused, self.peak_bytes, self.returned
        )
    }
}
