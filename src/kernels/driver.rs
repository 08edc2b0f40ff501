// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Layout driver and kernel entry point.
//!
//! The tensor is cut into `lanes` equal slices that run independently on the
//! rayon pool. Each lane owns a [`LaneKernel`]: a transfer plan, a compute
//! stage and a set of staging pools, all built once. The lane then walks its
//! slice tile by tile:
//!
//! ```text
//! for tile in 0..tile_count:
//!     for group in 0..sub_tiles:        // 1 flat, 3 packed
//!         copy_in   x, rotate_half(x), cos, sin  -> staging
//!         compute   out = x*cos + rotated*sin
//!         copy_out  staging -> out
//! ```
//!
//! A failing lane fails the whole launch; the output buffer must then be
//! treated as garbage.

use half::{bf16, f16};
use rayon::prelude::*;

use crate::error::{Result, RopeError};
use crate::kernels::compute::{ComputeStage, Element};
use crate::kernels::config::{KernelConfig, LaunchArgs};
use crate::kernels::format::FormatCode;
use crate::kernels::staging::TilePools;
use crate::kernels::transfer::TransferPlan;
use crate::memory::{estimate_staging_bytes, format_bytes, StagingBudget};

/// Global buffers of one launch, tagged with their element type.
#[derive(Debug)]
pub enum RopeBuffers<'a> {
    /// IEEE half buffers.
    F16 {
        /// Input activations.
        x: &'a [f16],
        /// Broadcast cosine table.
        cos: &'a [f16],
        /// Broadcast sine table.
        sin: &'a [f16],
        /// Output, same length as `x`.
        out: &'a mut [f16],
    },
    /// bfloat16 buffers.
    BF16 {
        /// Input activations.
        x: &'a [bf16],
        /// Broadcast cosine table.
        cos: &'a [bf16],
        /// Broadcast sine table.
        sin: &'a [bf16],
        /// Output, same length as `x`.
        out: &'a mut [bf16],
    },
    /// Single precision buffers.
    F32 {
        /// Input activations.
        x: &'a [f32],
        /// Broadcast cosine table.
        cos: &'a [f32],
        /// Broadcast sine table.
        sin: &'a [f32],
        /// Output, same length as `x`.
        out: &'a mut [f32],
    },
}

/// Apply rotate-half `RoPE` to raw buffers.
///
/// `args.format_code` selects precision and layout; it must agree with the
/// element type of `buffers`.
///
/// # Errors
/// - `Configuration` if a launch precondition does not hold
/// - `Format` for a rejected code or a buffer/format mismatch
/// - `OutOfMemory` if a lane's pools exceed `config.staging_bytes`
pub fn rope(buffers: RopeBuffers<'_>, args: &LaunchArgs, config: &KernelConfig) -> Result<()> {
    match buffers {
        RopeBuffers::F16 { x, cos, sin, out } => launch(x, cos, sin, out, args, config),
        RopeBuffers::BF16 { x, cos, sin, out } => launch(x, cos, sin, out, args, config),
        RopeBuffers::F32 { x, cos, sin, out } => launch(x, cos, sin, out, args, config),
    }
}

/// Typed form of [`rope`].
///
/// # Errors
/// Same as [`rope`].
pub fn launch<T: Element>(
    x: &[T],
    cos: &[T],
    sin: &[T],
    out: &mut [T],
    args: &LaunchArgs,
    config: &KernelConfig,
) -> Result<()> {
    let format = FormatCode::resolve(args.format_code, config.strict_format)?;
    if format.precision != T::PRECISION {
        return Err(RopeError::Format(format!(
            "format code {} expects {:?} buffers, got {:?}",
            args.format_code,
            format.precision,
            T::PRECISION
        )));
    }

    let total = args.total_length;
    for (name, len) in [
        ("x", x.len()),
        ("cos", cos.len()),
        ("sin", sin.len()),
        ("out", out.len()),
    ] {
        if len != total {
            return Err(RopeError::config(
                "total_length",
                format!("{name} holds {len} elements, expected {total}"),
            ));
        }
    }

    let lanes = config.lanes as usize;
    if lanes == 0 || total % lanes != 0 {
        return Err(RopeError::config(
            "lanes",
            format!("{total} elements do not split across {lanes} lanes"),
        ));
    }
    if total == 0 {
        return Ok(());
    }
    let lane_length = total / lanes;

    // Fails early on bad head_dim / tile_length before any lane starts.
    let plan = TransferPlan::new(format.layout, args.head_dim, args.tile_length)?;
    let staging = estimate_staging_bytes(format, args.head_dim, args.tile_length);

    tracing::debug!(
        ?format,
        lanes,
        lane_length,
        tile_length = plan.tile_length,
        tiles_per_lane = lane_length / plan.tile_length,
        staging = %format_bytes(staging),
        "launching tiled rope"
    );

    out.par_chunks_mut(lane_length)
        .enumerate()
        .try_for_each(|(lane, out_lane)| {
            let start = lane * lane_length;
            let end = start + lane_length;
            let mut kernel = LaneKernel::<T>::new(
                format,
                args.head_dim,
                args.tile_length,
                lane_length,
                config.staging_bytes,
            )?;
            tracing::trace!(
                lane,
                start,
                tiles = kernel.tile_count(),
                staging = %format_bytes(kernel.staging_peak()),
                "lane initialized"
            );
            kernel.process(&x[start..end], &cos[start..end], &sin[start..end], out_lane)
        })
}

/// Everything one lane needs, built once at lane initialization.
#[derive(Debug)]
pub struct LaneKernel<T> {
    plan: TransferPlan,
    compute: ComputeStage,
    pools: TilePools<T>,
    tile_count: usize,
    staging_peak: usize,
}

impl<T: Element> LaneKernel<T> {
    /// Plan transfers and carve the staging pools for a lane of
    /// `lane_length` elements.
    ///
    /// # Errors
    /// Returns `Configuration` if the tile does not fit the lane evenly and
    /// `OutOfMemory` if the pools exceed `staging_bytes`.
    pub fn new(
        format: FormatCode,
        head_dim: usize,
        tile_length: usize,
        lane_length: usize,
        staging_bytes: usize,
    ) -> Result<Self> {
        let plan = TransferPlan::new(format.layout, head_dim, tile_length)?;
        if lane_length % tile_length != 0 {
            return Err(RopeError::config(
                "tile_length",
                format!("{tile_length} does not divide the {lane_length}-element lane"),
            ));
        }

        let mut budget = StagingBudget::new(Some(staging_bytes));
        let pools = TilePools::new(
            plan.staging_len,
            format.precision.needs_scratch(),
            &mut budget,
        )?;
        let compute = ComputeStage::new(format.precision, &plan);

        Ok(Self {
            tile_count: lane_length / tile_length,
            staging_peak: budget.peak(),
            plan,
            compute,
            pools,
        })
    }

    /// Tiles this lane walks.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Staging bytes the lane's pools occupy.
    #[must_use]
    pub fn staging_peak(&self) -> usize {
        self.staging_peak
    }

    /// Run every tile of the lane.
    ///
    /// # Errors
    /// Returns `Pipeline` if a slice is shorter than the lane.
    pub fn process(&mut self, x: &[T], cos: &[T], sin: &[T], out: &mut [T]) -> Result<()> {
        for tile in 0..self.tile_count {
            for group in 0..self.plan.sub_tiles() {
                let offset = self.plan.offset(tile, group);
                self.copy_in(x, cos, sin, offset)?;
                self.compute.run(&mut self.pools)?;
                self.copy_out(out, offset)?;
            }
        }
        Ok(())
    }

    fn copy_in(&mut self, x: &[T], cos: &[T], sin: &[T], offset: usize) -> Result<()> {
        let pools = &mut self.pools;

        let slot = pools.x.acquire_write()?;
        self.plan.copy_in(x, offset, pools.x.get_mut(&slot)?)?;
        pools.x.commit(slot)?;

        let slot = pools.x.acquire_write()?;
        self.plan
            .copy_in_rotated(x, offset, pools.x.get_mut(&slot)?)?;
        pools.x.commit(slot)?;

        for table in [cos, sin] {
            let slot = pools.cos_sin.acquire_write()?;
            self.plan
                .copy_in(table, offset, pools.cos_sin.get_mut(&slot)?)?;
            pools.cos_sin.commit(slot)?;
        }
        Ok(())
    }

    fn copy_out(&mut self, out: &mut [T], offset: usize) -> Result<()> {
        let slot = self.pools.out.acquire_read()?;
        self.plan
            .copy_out(self.pools.out.get(&slot)?, out, offset)?;
        self.pools.out.release(slot)
    }
}
