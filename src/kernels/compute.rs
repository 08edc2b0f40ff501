// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Rotate-half multiply-accumulate over one staged tile.
//!
//! ```text
//! out = x * cos + rotate_half(x) * sin
//! rotate_half([x1, x2]) = [-x2, x1]
//! ```
//!
//! The transfer stage already swapped the halves of every row into the
//! rotated slot, so compute only has to negate the first half of each row
//! and run two multiplies and an add.
//!
//! ## Arithmetic paths
//!
//! - [`ArithmeticPath::Native`]: f16 and f32 compute in storage precision,
//!   every operation rounding to the storage type.
//! - [`ArithmeticPath::Upcast`]: bf16 is widened to f32, computed there and
//!   rounded back to nearest once, using three f32 scratch slots.
//!
//! ## Negation
//!
//! For 32- and 64-wide heads a lane pattern over one 256-byte vector repeat
//! picks the first half of every row. Other heads (including the padded 96
//! case) are negated row by row with an explicit pitch. Both produce the
//! same numbers.

use std::fmt::Debug;
use std::ops::{Add, Mul};

use candle_core::WithDType;
use half::{bf16, f16};

use crate::error::{Result, RopeError};
use crate::kernels::format::Precision;
use crate::kernels::staging::TilePools;
use crate::kernels::transfer::TransferPlan;

/// Bytes processed by one vector repeat.
pub const REPEAT_BYTES: usize = 256;

/// A storage element the kernel is instantiated for.
pub trait Element:
    WithDType + Default + Debug + Mul<Output = Self> + Add<Output = Self>
{
    /// Storage precision this type implements.
    const PRECISION: Precision;

    /// Widen to f32.
    fn widen(self) -> f32;

    /// Narrow from f32, rounding to nearest even.
    fn round_from(value: f32) -> Self;
}

impl Element for f32 {
    const PRECISION: Precision = Precision::Single;

    fn widen(self) -> f32 {
        self
    }

    fn round_from(value: f32) -> Self {
        value
    }
}

impl Element for f16 {
    const PRECISION: Precision = Precision::Half;

    fn widen(self) -> f32 {
        f16::to_f32(self)
    }

    fn round_from(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const PRECISION: Precision = Precision::BFloat16;

    fn widen(self) -> f32 {
        bf16::to_f32(self)
    }

    fn round_from(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

/// How a tile's arithmetic is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticPath {
    /// Compute in storage precision.
    Native,
    /// Compute in f32, round back once.
    Upcast,
}

impl ArithmeticPath {
    /// Path used for a storage precision.
    #[must_use]
    pub const fn for_precision(precision: Precision) -> Self {
        if precision.needs_scratch() {
            Self::Upcast
        } else {
            Self::Native
        }
    }
}

/// Which elements of a staged tile get negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegatePlan {
    /// Lane selection repeated over every vector repeat.
    Lanes {
        /// One flag per lane of a repeat.
        pattern: Vec<bool>,
    },
    /// The first `count` elements of every `row_pitch` elements.
    Strided {
        /// Distance between rows.
        row_pitch: usize,
        /// Elements negated at the start of each row.
        count: usize,
    },
}

impl NegatePlan {
    /// Plan negation of the first half of each row for elements of
    /// `elem_bytes`.
    #[must_use]
    pub fn new(head_dim: usize, row_pitch: usize, elem_bytes: usize) -> Self {
        let half = head_dim / 2;
        if head_dim == 32 || head_dim == 64 {
            let lanes = REPEAT_BYTES / elem_bytes;
            Self::Lanes {
                pattern: (0..lanes).map(|lane| lane % head_dim < half).collect(),
            }
        } else {
            Self::Strided {
                row_pitch,
                count: half,
            }
        }
    }

    /// Multiply the selected elements of `buf` by `neg_one`.
    pub fn apply<E: Copy + Mul<Output = E>>(&self, buf: &mut [E], neg_one: E) {
        match self {
            Self::Lanes { pattern } => {
                for repeat in buf.chunks_mut(pattern.len()) {
                    for (value, &selected) in repeat.iter_mut().zip(pattern) {
                        if selected {
                            *value = *value * neg_one;
                        }
                    }
                }
            }
            Self::Strided { row_pitch, count } => {
                for row in buf.chunks_mut(*row_pitch) {
                    let n = (*count).min(row.len());
                    for value in &mut row[..n] {
                        *value = *value * neg_one;
                    }
                }
            }
        }
    }
}

/// The compute phase of one lane.
#[derive(Debug, Clone)]
pub struct ComputeStage {
    path: ArithmeticPath,
    len: usize,
    negate: NegatePlan,
}

impl ComputeStage {
    /// Build the compute phase for a lane's transfer plan.
    #[must_use]
    pub fn new(precision: Precision, plan: &TransferPlan) -> Self {
        let path = ArithmeticPath::for_precision(precision);
        let negate_bytes = match path {
            ArithmeticPath::Native => precision.storage_bytes(),
            ArithmeticPath::Upcast => std::mem::size_of::<f32>(),
        };
        Self {
            path,
            len: plan.compute_len(),
            negate: NegatePlan::new(plan.head_dim, plan.row_pitch, negate_bytes),
        }
    }

    /// Arithmetic path in use.
    #[must_use]
    pub fn path(&self) -> ArithmeticPath {
        self.path
    }

    /// Consume the committed `x`, rotated, `cos` and `sin` slots and commit
    /// one output slot.
    ///
    /// # Errors
    /// Returns `Pipeline` if the slots are not where the protocol expects,
    /// or if the upcast path has no scratch pools.
    pub fn run<T: Element>(&self, pools: &mut TilePools<T>) -> Result<()> {
        let x = pools.x.acquire_read()?;
        let rotated = pools.x.acquire_read()?;
        let cos = pools.cos_sin.acquire_read()?;
        let sin = pools.cos_sin.acquire_read()?;
        let out = pools.out.acquire_write()?;

        {
            let (xs, rs) = pools.x.pair_mut(&x, &rotated)?;
            let cs = pools.cos_sin.get(&cos)?;
            let ss = pools.cos_sin.get(&sin)?;
            let os = pools.out.get_mut(&out)?;
            let n = self.len;

            match self.path {
                ArithmeticPath::Native => {
                    self.negate.apply(&mut rs[..n], T::round_from(-1.0));
                    for i in 0..n {
                        os[i] = xs[i] * cs[i] + rs[i] * ss[i];
                    }
                }
                ArithmeticPath::Upcast => {
                    let scratch = pools.scratch.as_mut().ok_or_else(|| {
                        RopeError::Pipeline("upcast path without scratch pools".to_string())
                    })?;
                    let t1 = scratch.temp.acquire_write()?;
                    let t2 = scratch.temp.acquire_write()?;
                    let acc = scratch.acc.acquire_write()?;
                    {
                        let (a, b) = scratch.temp.pair_mut(&t1, &t2)?;
                        let res = scratch.acc.get_mut(&acc)?;

                        cast_into(&xs[..n], &mut a[..n]);
                        cast_into(&cs[..n], &mut b[..n]);
                        for i in 0..n {
                            res[i] = a[i] * b[i];
                        }

                        cast_into(&rs[..n], &mut a[..n]);
                        cast_into(&ss[..n], &mut b[..n]);
                        self.negate.apply(&mut a[..n], -1.0f32);
                        for i in 0..n {
                            res[i] += a[i] * b[i];
                            os[i] = T::round_from(res[i]);
                        }
                    }
                    scratch.temp.release(t1)?;
                    scratch.temp.release(t2)?;
                    scratch.acc.release(acc)?;
                }
            }
        }

        pools.out.commit(out)?;
        pools.x.release(x)?;
        pools.x.release(rotated)?;
        pools.cos_sin.release(cos)?;
        pools.cos_sin.release(sin)?;
        Ok(())
    }
}

fn cast_into<T: Element>(src: &[T], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s.widen();
    }
}
