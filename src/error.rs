// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Error types for rope-tiled.

use candle_core::DType;
use thiserror::Error;

/// Result type alias for rope-tiled operations.
pub type Result<T> = std::result::Result<T, RopeError>;

/// Errors that can occur in rope-tiled operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RopeError {
    /// A launch precondition does not hold.
    #[error("invalid configuration for {dimension}: {reason}")]
    Configuration {
        /// Offending dimension or parameter
        dimension: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Numeric format code rejected or inconsistent with the buffers.
    #[error("format error: {0}")]
    Format(String),

    /// Staging memory exhausted.
    #[error("out of memory: required {required} bytes, available {available} bytes")]
    OutOfMemory {
        /// Required memory in bytes
        required: usize,
        /// Available memory in bytes
        available: usize,
    },

    /// Staging pipeline protocol violation.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Shape mismatch.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Tensor dtype has no kernel instantiation.
    #[error("unsupported dtype: {0:?}")]
    UnsupportedDtype(DType),

    /// GPU kernel error.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl RopeError {
    pub(crate) fn config(dimension: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            dimension,
            reason: reason.into(),
        }
    }
}
