// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fork-join over disjoint output planes.
//!
//! Every parallel region in the compute core is a pure map: each task owns
//! one chunk of the output exclusively and the only synchronisation point is
//! the implicit join at the end. Pools are built lazily, one per distinct
//! thread count, and reused across calls.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static POOLS: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();

fn pool_for(num_threads: usize) -> Option<Arc<ThreadPool>> {
    let pools = POOLS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut pools = pools.lock().ok()?;
    if let Some(pool) = pools.get(&num_threads) {
        return Some(Arc::clone(pool));
    }
    match ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("compute-{i}"))
        .build()
    {
        Ok(pool) => {
            let pool = Arc::new(pool);
            pools.insert(num_threads, Arc::clone(&pool));
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(num_threads, error = %e, "thread pool unavailable, running serially");
            None
        }
    }
}

/// Calls `f(index, chunk)` for every `chunk_len`-sized chunk of `data`.
///
/// With `num_threads <= 1`, or a single chunk, the loop runs on the caller's
/// thread. A trailing partial chunk is passed through as is.
pub fn for_each_chunk_mut<T, F>(data: &mut [T], chunk_len: usize, num_threads: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if chunk_len == 0 || data.is_empty() {
        return;
    }
    if num_threads <= 1 || data.len() <= chunk_len {
        data.chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(i, chunk)| f(i, chunk));
        return;
    }
    match pool_for(num_threads) {
        Some(pool) => pool.install(|| {
            data.par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
        }),
        None => data
            .chunks_mut(chunk_len)
            .enumerate()
            .for_each(|(i, chunk)| f(i, chunk)),
    }
}
