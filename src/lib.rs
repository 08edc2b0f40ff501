//! # rope-tiled
//!
//! Tiled, double-buffered rotary position embedding (`RoPE`) for transformer
//! inference and training, built on [Candle](https://github.com/huggingface/candle).
//!
//! The kernel computes `x * cos + rotate_half(x) * sin` over flat buffers:
//!
//! - the tensor is split across parallel lanes (rayon tasks)
//! - each lane streams fixed-size tiles through bounded staging pools
//! - 96-wide heads are padded to 128-wide staging rows
//! - bf16 is computed in f32 and rounded once
//! - a packed layout rotates three interleaved groups per row
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rope_tiled::kernels::{KernelConfig, TiledRope};
//!
//! let rope = TiledRope::new(KernelConfig::default());
//! // x: [batch, heads, seq, head_dim], cos/sin: [batch, 1, seq, head_dim]
//! let out = rope.apply(&x, &cos, &sin, 8 * 1024)?;
//! ```
//!
//! Raw buffers go through [`kernels::driver::rope`] with a numeric format code.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod kernels;
pub mod memory;

pub use error::{Result, RopeError};
