// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Strided transfer planning between global memory and staging slots.
//!
//! A tile moves in and out of staging as a burst of equally sized blocks:
//!
//! ```text
//! src: [block][src_gap][block][src_gap] ... [block]
//! dst: [block][dst_gap][block][dst_gap] ... [block]
//! ```
//!
//! Three row shapes need planning:
//! - 96-wide heads are padded to 128-wide staging rows, the natural transfer
//!   granularity of the vector unit;
//! - packed tiles interleave three groups per row, so one group is read with
//!   a gap covering the other two;
//! - the rotate-half copy moves each half-row into the opposite half of a
//!   scratch row.
//!
//! Everything here depends only on head dim, tile length and layout, so a
//! [`TransferPlan`] is built once per lane and reused for every tile.

use crate::error::{Result, RopeError};
use crate::kernels::format::Layout;

/// Staging row width for padded heads.
pub const PADDED_ROW: usize = 128;

/// The head width that gets padded to [`PADDED_ROW`].
pub const PADDED_HEAD_DIM: usize = 96;

/// Interleaved groups per row in the packed layout.
pub const PACKED_GROUPS: usize = 3;

/// Hardware transfer block size in bytes.
pub const BLOCK_BYTES: usize = 32;

/// Which copy a descriptor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    /// Contiguous copy with no gaps.
    Plain,
    /// Rows copied into (or out of) padded staging rows.
    PaddedRows,
    /// One group out of each packed row.
    PackedGroup,
    /// Half-rows swapped into a rotate-half scratch row.
    RotateHalf,
}

/// One block-strided copy, measured in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyParams {
    /// Kind of copy.
    pub kind: CopyKind,
    /// Number of blocks.
    pub block_count: usize,
    /// Elements per block.
    pub block_len: usize,
    /// Elements skipped in the source after each block.
    pub src_gap: usize,
    /// Elements skipped in the destination after each block.
    pub dst_gap: usize,
}

/// A [`CopyParams`] in hardware 32-byte block units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUnits {
    /// Number of blocks.
    pub block_count: usize,
    /// Block length in 32-byte units.
    pub block_len: usize,
    /// Source gap in 32-byte units.
    pub src_stride: usize,
    /// Destination gap in 32-byte units.
    pub dst_stride: usize,
}

impl CopyParams {
    /// A contiguous copy of `len` elements.
    #[must_use]
    pub const fn plain(len: usize) -> Self {
        Self {
            kind: CopyKind::Plain,
            block_count: 1,
            block_len: len,
            src_gap: 0,
            dst_gap: 0,
        }
    }

    /// Elements spanned in the source, first block to end of last block.
    #[must_use]
    pub const fn src_extent(&self) -> usize {
        extent(self.block_count, self.block_len, self.src_gap)
    }

    /// Elements spanned in the destination.
    #[must_use]
    pub const fn dst_extent(&self) -> usize {
        extent(self.block_count, self.block_len, self.dst_gap)
    }

    /// Encode in 32-byte units for elements of `elem_bytes`.
    ///
    /// `None` if some length is not a whole number of blocks.
    #[must_use]
    pub fn in_block_units(&self, elem_bytes: usize) -> Option<BlockUnits> {
        let units = |elems: usize| {
            let bytes = elems * elem_bytes;
            (bytes % BLOCK_BYTES == 0).then_some(bytes / BLOCK_BYTES)
        };
        Some(BlockUnits {
            block_count: self.block_count,
            block_len: units(self.block_len)?,
            src_stride: units(self.src_gap)?,
            dst_stride: units(self.dst_gap)?,
        })
    }

    /// Run the copy from the start of `src` to the start of `dst`.
    ///
    /// # Errors
    /// Returns `Pipeline` if either slice is shorter than the copy's extent.
    pub fn apply<E: Copy>(&self, src: &[E], dst: &mut [E]) -> Result<()> {
        if src.len() < self.src_extent() || dst.len() < self.dst_extent() {
            return Err(RopeError::Pipeline(format!(
                "{:?} copy spans {} -> {} elements, got {} -> {}",
                self.kind,
                self.src_extent(),
                self.dst_extent(),
                src.len(),
                dst.len()
            )));
        }

        let src_pitch = self.block_len + self.src_gap;
        let dst_pitch = self.block_len + self.dst_gap;
        for block in 0..self.block_count {
            let s = block * src_pitch;
            let d = block * dst_pitch;
            dst[d..d + self.block_len].copy_from_slice(&src[s..s + self.block_len]);
        }
        Ok(())
    }
}

const fn extent(count: usize, len: usize, gap: usize) -> usize {
    if count == 0 {
        0
    } else {
        count * len + (count - 1) * gap
    }
}

/// Staging slot length for a tile, in elements.
///
/// Padded heads take `PADDED_ROW` staging elements per row.
#[must_use]
pub fn staging_len(layout: Layout, head_dim: usize, tile_length: usize) -> usize {
    if layout == Layout::Flat && head_dim == PADDED_HEAD_DIM {
        PADDED_ROW * tile_length / head_dim
    } else {
        tile_length
    }
}

/// Every descriptor one lane needs, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Tensor layout.
    pub layout: Layout,
    /// Rotation group width.
    pub head_dim: usize,
    /// Elements per tile in global memory.
    pub tile_length: usize,
    /// Staging slot length in elements.
    pub staging_len: usize,
    /// Distance between consecutive rows in staging.
    pub row_pitch: usize,
    /// Rows moved per copy-in.
    pub rows: usize,
    /// `x`, `cos`, `sin` into staging.
    pub load: CopyParams,
    /// Output out of staging.
    pub store: CopyParams,
    /// `x` into the rotate-half scratch slot, applied once per half.
    pub rotate_half: CopyParams,
}

impl TransferPlan {
    /// Plan transfers for one lane.
    ///
    /// # Errors
    /// Returns `Configuration` if `head_dim` is zero or odd, or if
    /// `tile_length` is not a whole number of rows.
    pub fn new(layout: Layout, head_dim: usize, tile_length: usize) -> Result<Self> {
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(RopeError::config(
                "head_dim",
                format!("{head_dim} must be a non-zero even number"),
            ));
        }
        let row_len = match layout {
            Layout::Flat => head_dim,
            Layout::Packed => PACKED_GROUPS * head_dim,
        };
        if tile_length == 0 || tile_length % row_len != 0 {
            return Err(RopeError::config(
                "tile_length",
                format!("{tile_length} is not a non-zero multiple of the {row_len}-element row"),
            ));
        }

        let half = head_dim / 2;
        let rows = tile_length / row_len;
        let staging_len = staging_len(layout, head_dim, tile_length);

        let plan = match layout {
            Layout::Flat if head_dim == PADDED_HEAD_DIM => {
                let pad = PADDED_ROW - head_dim;
                Self {
                    layout,
                    head_dim,
                    tile_length,
                    staging_len,
                    row_pitch: PADDED_ROW,
                    rows,
                    load: CopyParams {
                        kind: CopyKind::PaddedRows,
                        block_count: rows,
                        block_len: head_dim,
                        src_gap: 0,
                        dst_gap: pad,
                    },
                    store: CopyParams {
                        kind: CopyKind::PaddedRows,
                        block_count: rows,
                        block_len: head_dim,
                        src_gap: pad,
                        dst_gap: 0,
                    },
                    rotate_half: CopyParams {
                        kind: CopyKind::RotateHalf,
                        block_count: rows,
                        block_len: half,
                        src_gap: half,
                        dst_gap: PADDED_ROW - half,
                    },
                }
            }
            Layout::Flat => Self {
                layout,
                head_dim,
                tile_length,
                staging_len,
                row_pitch: head_dim,
                rows,
                load: CopyParams::plain(tile_length),
                store: CopyParams::plain(tile_length),
                rotate_half: CopyParams {
                    kind: CopyKind::RotateHalf,
                    block_count: rows,
                    block_len: half,
                    src_gap: half,
                    dst_gap: half,
                },
            },
            Layout::Packed => {
                let others = (PACKED_GROUPS - 1) * head_dim;
                Self {
                    layout,
                    head_dim,
                    tile_length,
                    staging_len,
                    row_pitch: head_dim,
                    rows,
                    load: CopyParams {
                        kind: CopyKind::PackedGroup,
                        block_count: rows,
                        block_len: head_dim,
                        src_gap: others,
                        dst_gap: 0,
                    },
                    store: CopyParams {
                        kind: CopyKind::PackedGroup,
                        block_count: rows,
                        block_len: head_dim,
                        src_gap: 0,
                        dst_gap: others,
                    },
                    rotate_half: CopyParams {
                        kind: CopyKind::RotateHalf,
                        block_count: rows,
                        block_len: half,
                        src_gap: half + others,
                        dst_gap: half,
                    },
                }
            }
        };
        Ok(plan)
    }

    /// Whether staging rows carry padding.
    #[must_use]
    pub fn is_padded(&self) -> bool {
        self.row_pitch != self.head_dim
    }

    /// Staging elements the compute stage must cover.
    #[must_use]
    pub fn compute_len(&self) -> usize {
        self.rows * self.row_pitch
    }

    /// Copy-in/compute/copy-out rounds per tile.
    #[must_use]
    pub fn sub_tiles(&self) -> usize {
        match self.layout {
            Layout::Flat => 1,
            Layout::Packed => PACKED_GROUPS,
        }
    }

    /// Lane-local offset of sub-tile `group` of tile `tile`.
    #[must_use]
    pub fn offset(&self, tile: usize, group: usize) -> usize {
        tile * self.tile_length + group * self.head_dim
    }

    /// Copy a tile (or packed group) starting at `offset` into staging.
    ///
    /// # Errors
    /// Returns `Pipeline` if the copy runs past either buffer.
    pub fn copy_in<E: Copy>(&self, global: &[E], offset: usize, staging: &mut [E]) -> Result<()> {
        self.load.apply(tail(global, offset)?, staging)
    }

    /// Build `[x2, x1]` rows in staging from the tile at `offset`.
    ///
    /// The negation of the first half happens in the compute stage.
    ///
    /// # Errors
    /// Returns `Pipeline` if the copy runs past either buffer.
    pub fn copy_in_rotated<E: Copy>(
        &self,
        global: &[E],
        offset: usize,
        staging: &mut [E],
    ) -> Result<()> {
        let half = self.head_dim / 2;
        self.rotate_half
            .apply(tail(global, offset + half)?, staging)?;
        let upper = staging.get_mut(half..).ok_or_else(|| {
            RopeError::Pipeline(format!("staging slot shorter than half row {half}"))
        })?;
        self.rotate_half.apply(tail(global, offset)?, upper)
    }

    /// Copy a computed tile (or packed group) back to `offset`.
    ///
    /// # Errors
    /// Returns `Pipeline` if the copy runs past either buffer.
    pub fn copy_out<E: Copy>(&self, staging: &[E], global: &mut [E], offset: usize) -> Result<()> {
        let len = global.len();
        let dst = global.get_mut(offset..).ok_or_else(|| {
            RopeError::Pipeline(format!("offset {offset} outside {len}-element buffer"))
        })?;
        self.store.apply(staging, dst)
    }
}

fn tail<E>(buf: &[E], offset: usize) -> Result<&[E]> {
    buf.get(offset..).ok_or_else(|| {
        RopeError::Pipeline(format!(
            "offset {offset} outside {}-element buffer",
            buf.len()
        ))
    })
}
