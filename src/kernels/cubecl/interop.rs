// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Candle ↔ `CubeCL` tensor conversion.
//!
//! `CubeCL` buffers are created from raw little-endian bytes with
//! `client.create(bytes)` and read back the same way. Only f32 is moved
//! across this boundary.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, RopeError};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Check if `CubeCL` CUDA kernels can be launched.
///
/// `false` whenever the `cuda` feature is off.
#[must_use]
pub fn has_cubecl_cuda_support() -> bool {
    #[cfg(feature = "cuda")]
    {
        matches!(Device::cuda_if_available(0), Ok(Device::Cuda(_)))
    }

    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}

/// Flatten an f32 tensor into little-endian bytes.
///
/// # Errors
/// Returns `UnsupportedDtype` for anything but f32.
pub fn tensor_to_bytes(tensor: &Tensor) -> Result<Vec<u8>> {
    if tensor.dtype() != DType::F32 {
        return Err(RopeError::UnsupportedDtype(tensor.dtype()));
    }
    // Device-to-host copy for CUDA tensors
    let data: Vec<f32> = tensor.flatten_all()?.to_vec1()?;
    Ok(data.iter().flat_map(|f| f.to_le_bytes()).collect())
}

/// Rebuild an f32 tensor of `shape` on `device` from kernel output bytes.
///
/// # Errors
/// Returns `ShapeMismatch` if the byte count does not cover `shape`.
pub fn bytes_to_tensor(bytes: &[u8], shape: &[usize], device: &Device) -> Result<Tensor> {
    let num_elements: usize = shape.iter().product();
    if bytes.len() != num_elements * F32_BYTES {
        return Err(RopeError::ShapeMismatch {
            expected: shape.to_vec(),
            actual: vec![bytes.len() / F32_BYTES],
        });
    }

    let data: Vec<f32> = bytes
        .chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}
