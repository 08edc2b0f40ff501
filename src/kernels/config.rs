// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Launch configuration for the tiled RoPE kernel.
//!
//! [`KernelConfig`] holds what stays fixed across launches (lane count,
//! staging budget, format policy); [`LaunchArgs`] holds the scalars of one
//! launch.

/// Vector cores on the reference accelerator.
pub const DEFAULT_LANES: u32 = 48;

/// Unified staging buffer per vector core, in bytes.
pub const DEFAULT_STAGING_BYTES: usize = 192 * 1024;

/// Configuration for tiled RoPE kernel launches.
///
/// # Example
///
/// ```rust
/// use rope_tiled::kernels::KernelConfig;
///
/// // 48 lanes, 192 KiB staging per lane, lenient format codes
/// let config = KernelConfig::default();
///
/// // Everything on one lane, unknown format codes rejected
/// let config = KernelConfig::single_lane().with_strict_format();
/// assert_eq!(config.lanes, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of parallel lanes the tensor is split across.
    /// The total element count must divide evenly between them.
    pub lanes: u32,

    /// Staging memory each lane may carve pools from.
    pub staging_bytes: usize,

    /// Reject out-of-range format codes instead of running half/flat.
    pub strict_format: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            staging_bytes: DEFAULT_STAGING_BYTES,
            strict_format: false,
        }
    }
}

impl KernelConfig {
    /// Run every tile on a single lane.
    #[must_use]
    pub fn single_lane() -> Self {
        Self {
            lanes: 1,
            ..Self::default()
        }
    }

    /// Set the lane count. Zero lanes is rejected at launch.
    #[must_use]
    pub const fn with_lanes(mut self, lanes: u32) -> Self {
        self.lanes = lanes;
        self
    }

    /// Set the per-lane staging budget.
    #[must_use]
    pub const fn with_staging_bytes(mut self, bytes: usize) -> Self {
        self.staging_bytes = bytes;
        self
    }

    /// Reject out-of-range format codes.
    #[must_use]
    pub const fn with_strict_format(mut self) -> Self {
        self.strict_format = true;
        self
    }
}

/// Scalar arguments of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchArgs {
    /// Elements in each of `x`, `cos`, `sin` and the output.
    pub total_length: usize,
    /// Width of one rotation group.
    pub head_dim: usize,
    /// Elements per tile.
    pub tile_length: usize,
    /// Raw numeric format code.
    pub format_code: u8,
}
