// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! `CubeCL` GPU path for flat f32 `RoPE`.
//!
//! The tiled kernel targets a vector accelerator with explicit staging
//! memory. On CUDA devices that staging is managed by the hardware, so the
//! GPU path is a single elementwise kernel: one unit per output element,
//! reading its rotate-half partner straight from global memory.
//!
//! ## Module Structure
//!
//! - [`interop`] - Candle ↔ `CubeCL` byte conversion
//! - [`kernel`] - The rotate-half kernel and its launcher
//!
//! Everything that actually touches the GPU is compiled only with the
//! `cuda` feature; without it [`cubecl_rope`] reports a kernel error.

pub mod interop;
pub mod kernel;

pub use interop::{bytes_to_tensor, has_cubecl_cuda_support, tensor_to_bytes};
pub use kernel::cubecl_rope;
