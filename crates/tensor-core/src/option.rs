// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-call execution options loaded from TOML or built programmatically.
//!
//! # TOML Format
//! ```toml
//! num_threads = 4
//! lightmode = true
//! use_packing_layout = true
//! use_fp16_storage = true
//! use_fp16_arithmetic = false
//! use_bf16_storage = false
//! use_shader_pack8 = true
//! workspace_budget = "64M"
//! blob_budget = "unlimited"
//! ```
//!
//! An `Options` value is never mutated behind the caller's back: every
//! `create_pipeline`/`forward` call receives the options it should honour.

use crate::TensorError;
use memory_manager::{MemoryBudget, MemoryPool};
use std::path::Path;

/// Execution options for pipeline creation and `forward` calls.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Options {
    /// Worker threads for channel-parallel kernels.
    pub num_threads: usize,
    /// Release original weights once the kernel-ready layout exists.
    pub lightmode: bool,
    /// Allow 4/8-lane element packing.
    pub use_packing_layout: bool,
    /// Store activations and weights as IEEE half where supported.
    pub use_fp16_storage: bool,
    /// GPU: pack half-precision lanes (storage size only).
    pub use_fp16_packed: bool,
    /// Accumulate in half precision where supported.
    pub use_fp16_arithmetic: bool,
    /// Store activations and weights as bfloat16.
    pub use_bf16_storage: bool,
    /// GPU: allow 8-lane shader variants.
    pub use_shader_pack8: bool,
    /// Budget for the workspace pool built by [`Options::with_budget_pools`].
    pub workspace_budget: Option<String>,
    /// Budget for the blob pool built by [`Options::with_budget_pools`].
    pub blob_budget: Option<String>,
    /// Allocator for tensors that outlive the call. `None` means the heap.
    #[serde(skip)]
    pub blob_allocator: Option<MemoryPool>,
    /// Allocator for scratch tensors. `None` means the heap.
    #[serde(skip)]
    pub workspace_allocator: Option<MemoryPool>,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_threads: default_threads(),
            lightmode: true,
            use_packing_layout: true,
            use_fp16_storage: true,
            use_fp16_packed: true,
            use_fp16_arithmetic: true,
            use_bf16_storage: false,
            use_shader_pack8: false,
            workspace_budget: None,
            blob_budget: None,
            blob_allocator: None,
            workspace_allocator: None,
        }
    }
}

impl Options {
    /// Options that keep everything in pack1 `f32` on one thread.
    pub fn reference() -> Self {
        Self {
            num_threads: 1,
            lightmode: false,
            use_packing_layout: false,
            use_fp16_storage: false,
            use_fp16_packed: false,
            use_fp16_arithmetic: false,
            use_bf16_storage: false,
            use_shader_pack8: false,
            ..Self::default()
        }
    }

    /// Loads options from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, TensorError> {
        let content = std::fs::read_to_string(path).map_err(|source| TensorError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses options from a TOML string; missing keys take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, TensorError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn to_toml(&self) -> Result<String, TensorError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Builds the blob and workspace pools named by the budget strings.
    ///
    /// Roles without a budget keep their current allocator.
    pub fn with_budget_pools(mut self) -> Result<Self, TensorError> {
        if let Some(budget) = self.workspace_budget.as_deref() {
            let budget = MemoryBudget::parse(budget).map_err(|source| TensorError::Budget {
                role: "workspace",
                source,
            })?;
            self.workspace_allocator = Some(MemoryPool::named("workspace", budget));
        }
        if let Some(budget) = self.blob_budget.as_deref() {
            let budget = MemoryBudget::parse(budget).map_err(|source| TensorError::Budget {
                role: "blob",
                source,
            })?;
            self.blob_allocator = Some(MemoryPool::named("blob", budget));
        }
        Ok(self)
    }

    /// Worker count with `0` meaning "all available cores".
    pub fn resolve_threads(&self) -> usize {
        if self.num_threads == 0 {
            default_threads()
        } else {
            self.num_threads
        }
    }

    pub fn blob(&self) -> Option<&MemoryPool> {
        self.blob_allocator.as_ref()
    }

    pub fn workspace(&self) -> Option<&MemoryPool> {
        self.workspace_allocator.as_ref()
    }

    /// A copy whose blob allocator is this call's workspace allocator.
    ///
    /// Used when a helper that allocates from the blob role should produce a
    /// scratch tensor instead.
    pub fn scratch(&self) -> Self {
        let mut opt = self.clone();
        opt.blob_allocator = self.workspace_allocator.clone();
        opt
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("num_threads", &self.num_threads)
            .field("lightmode", &self.lightmode)
            .field("use_packing_layout", &self.use_packing_layout)
            .field("use_fp16_storage", &self.use_fp16_storage)
            .field("use_fp16_arithmetic", &self.use_fp16_arithmetic)
            .field("use_bf16_storage", &self.use_bf16_storage)
            .field("use_shader_pack8", &self.use_shader_pack8)
            .field("blob_allocator", &self.blob_allocator.as_ref().map(|p| p.label()))
            .field(
                "workspace_allocator",
                &self.workspace_allocator.as_ref().map(|p| p.label()),
            )
            .finish()
    }
}
