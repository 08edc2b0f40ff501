//! GPU-specific tests for rope-tiled.
//!
//! Tests here need the `cuda` feature and a CUDA device. They are skipped if:
//!
//! 1. The `cuda` feature is not enabled
//! 2. No CUDA-capable GPU is available
//!
//! ## Running GPU Tests
//!
//! ```bash
//! cargo test --features cuda --test integration
//! ```

// Always include the module, tests inside are conditionally compiled
pub mod rope;

/// Check if a CUDA GPU is available for testing.
#[cfg(feature = "cuda")]
pub fn is_gpu_available() -> bool {
    use candle_core::Device;

    match Device::new_cuda(0) {
        Ok(device) => match candle_core::Tensor::ones((2, 2), candle_core::DType::F32, &device) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("GPU detected but tensor creation failed: {}", e);
                false
            }
        },
        Err(e) => {
            tracing::warn!("No CUDA GPU available: {}", e);
            false
        }
    }
}

/// Fallback when the CUDA feature is not enabled.
#[allow(dead_code)]
#[cfg(not(feature = "cuda"))]
pub fn is_gpu_available() -> bool {
    false
}

/// Skip a test if no GPU is available.
///
/// Works with `Result<(), _>` return types by returning `Ok(())`.
#[macro_export]
macro_rules! require_gpu {
    () => {
        if !crate::gpu::is_gpu_available() {
            eprintln!("SKIP: Test requires CUDA GPU - use 'cargo test --features cuda'");
            return Ok(());
        }
    };
}
