// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Bounded staging queues for the copy-in / compute / copy-out pipeline.
//!
//! A [`StagingQueue`] owns one arena split into `depth` fixed slots. Slots
//! move through a strict hand-off protocol:
//!
//! ```text
//! acquire_write -> (fill) -> commit -> acquire_read -> (use) -> release
//!        \______________________________________________________/
//!                  scratch slots may be released directly
//! ```
//!
//! [`Slot`] handles are move-only, so a committed or released slot cannot
//! be touched again through the same handle. The depth bounds how many
//! tiles can be in flight; the arena is sized once and never grows.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, RopeError};
use crate::memory::StagingBudget;

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Writing,
    Committed,
    Reading,
}

/// Exclusive handle to one staging slot.
#[derive(Debug)]
#[must_use = "a slot must be committed or released"]
pub struct Slot {
    queue: usize,
    index: usize,
}

/// Fixed-depth pool of equally sized staging slots.
#[derive(Debug)]
pub struct StagingQueue<E> {
    name: &'static str,
    id: usize,
    slot_len: usize,
    arena: Vec<E>,
    states: Vec<SlotState>,
    free: VecDeque<usize>,
    committed: VecDeque<usize>,
}

impl<E: Copy + Default> StagingQueue<E> {
    /// Carve a queue of `depth` slots of `slot_len` elements out of `budget`.
    ///
    /// # Errors
    /// Returns `OutOfMemory` if the budget or the allocator cannot provide
    /// the arena, `Configuration` if `depth` is zero.
    pub fn new(
        name: &'static str,
        depth: usize,
        slot_len: usize,
        budget: &mut StagingBudget,
    ) -> Result<Self> {
        if depth == 0 {
            return Err(RopeError::config("depth", format!("queue {name} needs at least one slot")));
        }
        let elems = depth.checked_mul(slot_len).ok_or(RopeError::OutOfMemory {
            required: usize::MAX,
            available: budget.available(),
        })?;
        let bytes = elems * std::mem::size_of::<E>();
        budget.allocate(bytes)?;

        let mut arena = Vec::new();
        if arena.try_reserve_exact(elems).is_err() {
            budget.free(bytes);
            return Err(RopeError::OutOfMemory {
                required: bytes,
                available: 0,
            });
        }
        arena.resize(elems, E::default());

        Ok(Self {
            name,
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            slot_len,
            arena,
            states: vec![SlotState::Free; depth],
            free: (0..depth).collect(),
            committed: VecDeque::with_capacity(depth),
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.states.len()
    }

    /// Slots available to `acquire_write`.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Slots waiting for `acquire_read`.
    #[must_use]
    pub fn committed_slots(&self) -> usize {
        self.committed.len()
    }

    /// Take a free slot for writing.
    ///
    /// # Errors
    /// Returns `Pipeline` if every slot is in flight; a sequential lane
    /// would wait forever here.
    pub fn acquire_write(&mut self) -> Result<Slot> {
        let index = self.free.pop_front().ok_or_else(|| {
            RopeError::Pipeline(format!(
                "queue {} exhausted: all {} slots in flight",
                self.name,
                self.depth()
            ))
        })?;
        self.states[index] = SlotState::Writing;
        Ok(Slot {
            queue: self.id,
            index,
        })
    }

    /// Hand a written slot to the next stage.
    ///
    /// # Errors
    /// Returns `Pipeline` if the slot is foreign or not being written.
    pub fn commit(&mut self, slot: Slot) -> Result<()> {
        self.expect_state(&slot, &[SlotState::Writing], "commit")?;
        self.states[slot.index] = SlotState::Committed;
        self.committed.push_back(slot.index);
        Ok(())
    }

    /// Take the oldest committed slot for reading.
    ///
    /// # Errors
    /// Returns `Pipeline` if nothing has been committed.
    pub fn acquire_read(&mut self) -> Result<Slot> {
        let index = self.committed.pop_front().ok_or_else(|| {
            RopeError::Pipeline(format!("queue {} has no committed slot", self.name))
        })?;
        self.states[index] = SlotState::Reading;
        Ok(Slot {
            queue: self.id,
            index,
        })
    }

    /// Return a slot to the free list.
    ///
    /// # Errors
    /// Returns `Pipeline` if the slot is foreign or not currently owned.
    pub fn release(&mut self, slot: Slot) -> Result<()> {
        self.expect_state(&slot, &[SlotState::Writing, SlotState::Reading], "release")?;
        self.states[slot.index] = SlotState::Free;
        self.free.push_back(slot.index);
        Ok(())
    }

    /// Read access to an owned slot.
    ///
    /// # Errors
    /// Returns `Pipeline` if the slot is foreign or not currently owned.
    pub fn get(&self, slot: &Slot) -> Result<&[E]> {
        self.expect_state(slot, &[SlotState::Writing, SlotState::Reading], "read")?;
        let start = slot.index * self.slot_len;
        Ok(&self.arena[start..start + self.slot_len])
    }

    /// Write access to an owned slot.
    ///
    /// # Errors
    /// Returns `Pipeline` if the slot is foreign or not currently owned.
    pub fn get_mut(&mut self, slot: &Slot) -> Result<&mut [E]> {
        self.expect_state(slot, &[SlotState::Writing, SlotState::Reading], "write")?;
        let start = slot.index * self.slot_len;
        Ok(&mut self.arena[start..start + self.slot_len])
    }

    /// Write access to two distinct owned slots at once.
    ///
    /// # Errors
    /// Returns `Pipeline` if either slot is foreign or not owned, or if
    /// both handles name the same slot.
    pub fn pair_mut(&mut self, a: &Slot, b: &Slot) -> Result<(&mut [E], &mut [E])> {
        let owned = [SlotState::Writing, SlotState::Reading];
        self.expect_state(a, &owned, "write")?;
        self.expect_state(b, &owned, "write")?;
        if a.index == b.index {
            return Err(RopeError::Pipeline(format!(
                "queue {}: slot {} borrowed twice",
                self.name, a.index
            )));
        }

        let len = self.slot_len;
        let (lo, hi, swapped) = if a.index < b.index {
            (a.index, b.index, false)
        } else {
            (b.index, a.index, true)
        };
        let (head, rest) = self.arena.split_at_mut(hi * len);
        let first = &mut head[lo * len..(lo + 1) * len];
        let second = &mut rest[..len];
        Ok(if swapped {
            (second, first)
        } else {
            (first, second)
        })
    }

    fn expect_state(&self, slot: &Slot, allowed: &[SlotState], op: &str) -> Result<()> {
        if slot.queue != self.id {
            return Err(RopeError::Pipeline(format!(
                "{op} on queue {} with a slot from another queue",
                self.name
            )));
        }
        let state = self.states[slot.index];
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(RopeError::Pipeline(format!(
                "{op} on queue {} slot {} in state {state:?}",
                self.name, slot.index
            )))
        }
    }
}

/// Depth of the `x`/rotated and `cos`/`sin` queues.
pub const INPUT_DEPTH: usize = 2;

/// Depth of the output queue.
pub const OUTPUT_DEPTH: usize = 1;

/// Depth of the f32 temporaries on the upcast path.
pub const SCRATCH_DEPTH: usize = 2;

/// Depth of the f32 accumulator on the upcast path.
pub const ACC_DEPTH: usize = 1;

/// f32 scratch used by the upcast path.
#[derive(Debug)]
pub struct ScratchPools {
    /// Two widened operands.
    pub temp: StagingQueue<f32>,
    /// Widened accumulator.
    pub acc: StagingQueue<f32>,
}

/// Every staging queue one lane uses.
#[derive(Debug)]
pub struct TilePools<T> {
    /// `x` followed by its rotated copy.
    pub x: StagingQueue<T>,
    /// `cos` followed by `sin`.
    pub cos_sin: StagingQueue<T>,
    /// Computed tiles waiting for copy-out.
    pub out: StagingQueue<T>,
    /// Present only on the upcast path.
    pub scratch: Option<ScratchPools>,
}

impl<T: Copy + Default> TilePools<T> {
    /// Allocate all queues of a lane with slots of `slot_len` elements.
    ///
    /// # Errors
    /// Returns `OutOfMemory` if the pools do not fit in `budget`.
    pub fn new(slot_len: usize, with_scratch: bool, budget: &mut StagingBudget) -> Result<Self> {
        let x = StagingQueue::new("x", INPUT_DEPTH, slot_len, budget)?;
        let cos_sin = StagingQueue::new("cos_sin", INPUT_DEPTH, slot_len, budget)?;
        let out = StagingQueue::new("out", OUTPUT_DEPTH, slot_len, budget)?;
        let scratch = if with_scratch {
            Some(ScratchPools {
                temp: StagingQueue::new("temp", SCRATCH_DEPTH, slot_len, budget)?,
                acc: StagingQueue::new("acc", ACC_DEPTH, slot_len, budget)?,
            })
        } else {
            None
        };
        Ok(Self {
            x,
            cos_sin,
            out,
            scratch,
        })
    }
}
