//! Test utilities and fixtures for the tiled RoPE integration tests.
//!
//! Seeded data generation, reference comparisons and shape fixtures shared
//! by `integration.rs` and the GPU tests.

#![allow(dead_code)]

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Accuracy of one tensor against a reference.
#[derive(Debug, Clone)]
pub struct AccuracyMetrics {
    /// Mean absolute error.
    pub mae: f32,
    /// Largest absolute error.
    pub max_error: f32,
    /// Elements that differ at all.
    pub mismatches: usize,
}

/// A `[outer, heads, seq, width]` test case.
#[derive(Debug, Clone)]
pub struct RopeCase {
    /// Shape of `x`.
    pub shape: (usize, usize, usize, usize),
    /// Shape of `cos`/`sin` before broadcast.
    pub table_shape: (usize, usize, usize, usize),
    /// Requested tile length.
    pub tile: usize,
    /// Random seed for reproducible tests.
    pub seed: u64,
}

impl RopeCase {
    /// Build `x`, `cos`, `sin` in `dtype`.
    pub fn tensors(&self, dtype: DType) -> Result<(Tensor, Tensor, Tensor)> {
        let x = TestFixtures::uniform(self.shape, 2.0, self.seed, dtype)?;
        let cos = TestFixtures::uniform(self.table_shape, 1.0, self.seed + 1_000_003, dtype)?;
        let sin = TestFixtures::uniform(self.table_shape, 1.0, self.seed + 2_000_003, dtype)?;
        Ok((x, cos, sin))
    }
}

/// Test fixtures for common tensor patterns.
pub struct TestFixtures;

impl TestFixtures {
    /// Uniform values in `[-max, max]`, reproducible from `seed`.
    pub fn uniform(
        shape: (usize, usize, usize, usize),
        max: f32,
        seed: u64,
        dtype: DType,
    ) -> Result<Tensor> {
        let count = shape.0 * shape.1 * shape.2 * shape.3;
        let values = Self::generate_uniform_values(count, max, seed);
        Ok(Tensor::from_vec(values, shape, &Device::Cpu)?.to_dtype(dtype)?)
    }

    /// Common flat-layout scenarios as `(name, case)`.
    pub fn flat_scenarios() -> Vec<(&'static str, RopeCase)> {
        vec![
            (
                "d32_heads_broadcast",
                RopeCase {
                    shape: (2, 4, 8, 32),
                    table_shape: (2, 1, 8, 32),
                    tile: 256,
                    seed: 7,
                },
            ),
            (
                "d64_seq_broadcast",
                RopeCase {
                    shape: (1, 3, 16, 64),
                    table_shape: (1, 3, 1, 64),
                    tile: 512,
                    seed: 11,
                },
            ),
            (
                "d128_full_tables",
                RopeCase {
                    shape: (1, 2, 4, 128),
                    table_shape: (1, 2, 4, 128),
                    tile: 256,
                    seed: 13,
                },
            ),
        ]
    }

    fn generate_uniform_values(count: usize, max: f32, seed: u64) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        (0..count)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                (seed + i as u64).hash(&mut hasher);
                let hash_value = hasher.finish();

                // Convert hash to uniform [-max, max]
                let normalized = (hash_value as f64) / (u64::MAX as f64);
                ((normalized * 2.0 - 1.0) * f64::from(max)) as f32
            })
            .collect()
    }
}

/// Comparison utilities.
pub struct ValidationUtils;

impl ValidationUtils {
    /// Compare two tensors element by element in f32.
    pub fn accuracy(actual: &Tensor, expected: &Tensor) -> Result<AccuracyMetrics> {
        let a = actual.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let e = expected.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a.len(), e.len(), "Tensor dimensions must match");

        let mut sum_abs_error = 0.0;
        let mut max_error: f32 = 0.0;
        let mut mismatches = 0;
        for (x, y) in a.iter().zip(&e) {
            let error = (x - y).abs();
            sum_abs_error += error;
            max_error = max_error.max(error);
            if x.to_bits() != y.to_bits() {
                mismatches += 1;
            }
        }

        Ok(AccuracyMetrics {
            mae: sum_abs_error / a.len().max(1) as f32,
            max_error,
            mismatches,
        })
    }

    /// Assert bit-exact equality.
    pub fn assert_identical(actual: &Tensor, expected: &Tensor) -> Result<()> {
        let metrics = Self::accuracy(actual, expected)?;
        assert_eq!(
            metrics.mismatches, 0,
            "{} elements differ, max error {}",
            metrics.mismatches, metrics.max_error
        );
        Ok(())
    }
}
