// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU feature and core-count readers.
//!
//! Reads CPU facts from:
//! - `/proc/cpuinfo`: the `Features` line on aarch64, the `isa` line on
//!   RISC-V and the `flags` line on x86.
//! - `/sys/devices/system/cpu/online`: online core count.
//!
//! Every reader is pure over its text input so that the parsing can be
//! tested against captured files from real boards.

use crate::CapsError;
use std::collections::BTreeSet;
use std::path::Path;

/// Base sysfs path for CPU information.
const CPU_BASE: &str = "/sys/devices/system/cpu";

/// Kernel CPU description.
pub(crate) const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Reads a sysfs/procfs file and returns its trimmed content.
pub(crate) fn read_sysfs_file(path: &Path) -> Result<String, CapsError> {
    if !path.exists() {
        return Err(CapsError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| CapsError::ReadError {
            path: path.display().to_string(),
            source,
        })
}

/// Feature tokens advertised by the first CPU in a `/proc/cpuinfo` dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    tokens: BTreeSet<String>,
}

impl CpuFeatures {
    /// Parses the first `Features`, `isa` or `flags` line.
    ///
    /// RISC-V ISA strings (`rv64imafdcv_zicsr_zfh`) are split into their
    /// single-letter base extensions and `_`-separated named extensions.
    pub fn parse(content: &str, source_path: &Path) -> Result<Self, CapsError> {
        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "Features" | "flags" => {
                    return Ok(Self {
                        tokens: value.split_whitespace().map(str::to_string).collect(),
                    });
                }
                "isa" => return Ok(Self::from_riscv_isa(value)),
                _ => {}
            }
        }
        Err(CapsError::ParseError {
            path: source_path.display().to_string(),
            detail: "no Features, isa or flags line".to_string(),
        })
    }

    fn from_riscv_isa(isa: &str) -> Self {
        let isa = isa.to_ascii_lowercase();
        let mut parts = isa.split('_');
        let mut tokens = BTreeSet::new();
        if let Some(base) = parts.next() {
            let letters = base
                .strip_prefix("rv64")
                .or_else(|| base.strip_prefix("rv32"))
                .unwrap_or(base);
            for letter in letters.chars().filter(|c| c.is_ascii_alphabetic()) {
                tokens.insert(letter.to_string());
            }
        }
        tokens.extend(parts.filter(|p| !p.is_empty()).map(str::to_string));
        Self { tokens }
    }

    /// Reads `/proc/cpuinfo`.
    pub fn read() -> Result<Self, CapsError> {
        let path = Path::new(CPUINFO_PATH);
        let content = read_sysfs_file(path)?;
        Self::parse(&content, path)
    }

    pub fn has(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Determines the number of online CPU cores.
///
/// Tries `/sys/devices/system/cpu/online` first (e.g., `"0-3"` → 4 cores),
/// then falls back to `std::thread::available_parallelism()`.
pub(crate) fn read_online_cores() -> Result<usize, CapsError> {
    let online_path = format!("{CPU_BASE}/online");
    if let Ok(content) = read_sysfs_file(Path::new(&online_path)) {
        if let Some(count) = parse_cpu_range(&content) {
            return Ok(count);
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .map_err(|source| CapsError::ReadError {
            path: CPU_BASE.to_string(),
            source,
        })
}

/// Parses a CPU range string like `"0-3"` → 4, `"0"` → 1, `"0,2-3"` → 3.
pub(crate) fn parse_cpu_range(s: &str) -> Option<usize> {
    let mut total = 0usize;
    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().ok()?;
            let end: usize = end.trim().parse().ok()?;
            total += end.checked_sub(start)? + 1;
        } else {
            let _: usize = part.parse().ok()?;
            total += 1;
        }
    }
    (total > 0).then_some(total)
}

/// Vector register length in bytes, read from the `vlenb` CSR.
///
/// Only call once the `v` extension is known to be present.
#[cfg(target_arch = "riscv64")]
pub(crate) fn read_vlenb() -> usize {
    let vlenb: usize;
    // SAFETY: reading the vlenb CSR (0xc22) has no side effects and is legal
    // whenever the vector extension is implemented.
    unsafe { std::arch::asm!("csrr {0}, 0xc22", out(reg) vlenb) };
    vlenb
}
