//! Tiled rotate-half `RoPE` kernel.
//!
//! Leaves first: [`transfer`] plans block copies, [`staging`] owns the
//! staging pools, [`compute`] does the arithmetic on one tile and [`driver`]
//! walks the tiles of every lane. [`host`] and [`rope`] sit on top and speak
//! candle tensors.

pub mod compute;
pub mod config;
pub mod cubecl;
pub mod driver;
pub mod format;
pub mod host;
pub mod rope;
pub mod staging;
pub mod transfer;

pub use compute::{ArithmeticPath, Element};
pub use config::{KernelConfig, LaunchArgs};
pub use driver::{launch, rope, RopeBuffers};
pub use format::{FormatCode, Layout, Precision};
pub use host::{adjust_tile_length, broadcast_tables, format_code_for, TiledRope};
pub use rope::RotaryEmbedding;
