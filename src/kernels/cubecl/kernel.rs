// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Rotate-half `RoPE` `CubeCL` kernel.
//!
//! ```text
//! unit i:   col = i % head_dim
//!           partner = col < half ? -x[i + half] : x[i - half]
//!           out[i] = x[i] * cos[i] + partner * sin[i]
//! ```
//!
//! `cos` and `sin` arrive already broadcast to the shape of `x`, exactly as
//! for the tiled CPU kernel.

use candle_core::Tensor;

use crate::error::{Result, RopeError};

#[cfg(feature = "cuda")]
use cubecl::prelude::*;
#[cfg(feature = "cuda")]
use cubecl_cuda::CudaRuntime;

/// Threads per cube.
#[cfg(feature = "cuda")]
const BLOCK_SIZE: u32 = 256;

#[cfg(feature = "cuda")]
#[cube(launch)]
fn rotate_half_kernel<F: Float>(
    x: &Array<F>,
    cos: &Array<F>,
    sin: &Array<F>,
    out: &mut Array<F>,
    total_val: u32,
    head_dim_val: u32,
) {
    let idx = CUBE_POS_X * CUBE_DIM_X + UNIT_POS_X;
    if idx >= total_val {
        terminate!();
    }

    let half = head_dim_val / 2;
    let col = idx % head_dim_val;

    let mut partner = F::new(0.0);
    if col < half {
        partner = F::new(0.0) - x[idx + half];
    } else {
        partner = x[idx - half];
    }

    out[idx] = x[idx] * cos[idx] + partner * sin[idx];
}

/// Apply flat f32 `RoPE` on the CUDA device with `CubeCL`.
///
/// `cos` and `sin` must already have the shape of `x`.
///
/// # Errors
/// Returns `Kernel` when built without the `cuda` feature or when no CUDA
/// device is present, `ShapeMismatch` if the tables do not match `x`.
pub fn cubecl_rope(x: &Tensor, cos: &Tensor, sin: &Tensor, head_dim: usize) -> Result<Tensor> {
    for table in [cos, sin] {
        if table.dims() != x.dims() {
            return Err(RopeError::ShapeMismatch {
                expected: x.dims().to_vec(),
                actual: table.dims().to_vec(),
            });
        }
    }

    #[cfg(feature = "cuda")]
    {
        if super::interop::has_cubecl_cuda_support() {
            return launch_cubecl_rope(x, cos, sin, head_dim);
        }
    }

    let _ = head_dim;
    Err(RopeError::Kernel(
        "CubeCL CUDA runtime not available".to_string(),
    ))
}

#[cfg(feature = "cuda")]
fn launch_cubecl_rope(x: &Tensor, cos: &Tensor, sin: &Tensor, head_dim: usize) -> Result<Tensor> {
    use super::interop::{bytes_to_tensor, tensor_to_bytes};

    let num_elements = x.elem_count();
    let total = u32::try_from(num_elements)
        .map_err(|_| RopeError::config("total_length", "exceeds u32 indexing"))?;
    let head_dim_u32 = u32::try_from(head_dim)
        .map_err(|_| RopeError::config("head_dim", "exceeds u32 indexing"))?;

    tracing::debug!(
        elements = num_elements,
        head_dim,
        "launching CubeCL rotate-half kernel"
    );

    // TODO: hand CUDA storage to CubeCL directly instead of staging through host bytes
    let x_bytes = tensor_to_bytes(x)?;
    let cos_bytes = tensor_to_bytes(cos)?;
    let sin_bytes = tensor_to_bytes(sin)?;

    let device = cubecl_cuda::CudaDevice::new(0);
    let client = CudaRuntime::client(&device);

    let x_handle = client.create(&x_bytes);
    let cos_handle = client.create(&cos_bytes);
    let sin_handle = client.create(&sin_bytes);
    let out_handle = client.empty(num_elements * std::mem::size_of::<f32>());

    let cube_count = CubeCount::Static(total.div_ceil(BLOCK_SIZE), 1, 1);
    let cube_dim = CubeDim::new(BLOCK_SIZE, 1, 1);

    // SAFETY: every handle was created above with exactly num_elements f32s
    unsafe {
        rotate_half_kernel::launch::<f32, CudaRuntime>(
            &client,
            cube_count,
            cube_dim,
            ArrayArg::from_raw_parts::<f32>(&x_handle, num_elements, 1),
            ArrayArg::from_raw_parts::<f32>(&cos_handle, num_elements, 1),
            ArrayArg::from_raw_parts::<f32>(&sin_handle, num_elements, 1),
            ArrayArg::from_raw_parts::<f32>(&out_handle, num_elements, 1),
            ScalarArg::new(total),
            ScalarArg::new(head_dim_u32),
        );
    }

    let output_bytes = client.read_one(out_handle);
    bytes_to_tensor(&output_bytes, x.dims(), x.device())
}
