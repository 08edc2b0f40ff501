//! Staging memory accounting.
//!
//! Every lane owns a fixed amount of on-chip staging memory. Pools are carved
//! out of it once, at lane initialization, and the budget refuses any pool
//! that would not fit.

use crate::error::{Result, RopeError};
use crate::kernels::format::FormatCode;
use crate::kernels::transfer::staging_len;

/// Staging memory budget for one lane.
#[derive(Debug, Clone)]
pub struct StagingBudget {
    /// Total allocated bytes
    allocated: usize,
    /// Peak memory usage
    peak: usize,
    /// Memory limit (if set)
    limit: Option<usize>,
}

impl StagingBudget {
    /// Create a new staging budget.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            allocated: 0,
            peak: 0,
            limit,
        }
    }

    /// Request memory allocation.
    ///
    /// # Errors
    /// Returns `OutOfMemory` if the limit would be exceeded.
    pub fn allocate(&mut self, bytes: usize) -> Result<()> {
        let new_total = self
            .allocated
            .checked_add(bytes)
            .ok_or(RopeError::OutOfMemory {
                required: usize::MAX,
                available: self.available(),
            })?;

        if let Some(limit) = self.limit {
            if new_total > limit {
                return Err(RopeError::OutOfMemory {
                    required: new_total,
                    available: limit.saturating_sub(self.allocated),
                });
            }
        }

        self.allocated = new_total;
        self.peak = self.peak.max(self.allocated);
        Ok(())
    }

    /// Free memory.
    pub fn free(&mut self, bytes: usize) {
        self.allocated = self.allocated.saturating_sub(bytes);
    }

    /// Get current allocation.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Get peak allocation.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Bytes still available under the limit.
    #[must_use]
    pub fn available(&self) -> usize {
        self.limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.allocated))
    }
}

/// Predict the staging footprint of one lane, in bytes.
///
/// Mirrors the pools built by the layout driver: two depth-2 input pools,
/// a depth-1 output pool and, on the upcast path, a depth-2 and a depth-1
/// f32 scratch pool.
#[must_use]
pub fn estimate_staging_bytes(format: FormatCode, head_dim: usize, tile_length: usize) -> usize {
    let slot = staging_len(format.layout, head_dim, tile_length);
    let storage = format.precision.storage_bytes();

    let inputs = 2 * 2 * slot * storage;
    let output = slot * storage;
    let scratch = if format.precision.needs_scratch() {
        3 * slot * std::mem::size_of::<f32>()
    } else {
        0
    };

    inputs + output + scratch
}

/// Format bytes as human-readable string.
#[must_use]
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
