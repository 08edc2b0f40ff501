// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Rotary Position Embedding (`RoPE`) tables and reference math.
//!
//! `RoPE` encodes position information directly into the query and key vectors
//! through rotation, enabling the model to learn relative position relationships.
//!
//! ## Rotate-half form
//!
//! The kernel uses the rotate-half formulation over full-width tables:
//!
//! ```text
//! out = x * cos + rotate_half(x) * sin
//! rotate_half([x1, x2]) = [-x2, x1]
//! ```
//!
//! where `cos`/`sin` hold each frequency twice, once for each half. This
//! module builds those tables and provides the plain tensor-op version of the
//! formula that the tiled kernel is checked against.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, RopeError};
use crate::kernels::config::KernelConfig;
use crate::kernels::format::{FormatCode, Layout};
use crate::kernels::host::TiledRope;
use crate::memory::estimate_staging_bytes;

/// `rotate_half([x1, x2]) = [-x2, x1]` along the last axis.
///
/// # Errors
/// Returns `Configuration` if the last axis has odd length.
pub fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last = x.rank().saturating_sub(1);
    let dim = x.dim(last)?;
    if dim % 2 != 0 {
        return Err(RopeError::config("head_dim", format!("{dim} is odd")));
    }
    let half = dim / 2;
    let x1 = x.narrow(last, 0, half)?;
    let x2 = x.narrow(last, half, half)?;
    Ok(Tensor::cat(&[&x2.neg()?, &x1], last)?)
}

/// `x * cos + rotate_half(x) * sin` in the dtype of `x`.
///
/// `cos` and `sin` are broadcast against `x`.
///
/// # Errors
/// Returns an error if the tables do not broadcast to `x`.
pub fn apply_rotary_reference(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let rotated = rotate_half(x)?;
    Ok((x.broadcast_mul(cos)? + rotated.broadcast_mul(sin)?)?)
}

/// [`apply_rotary_reference`] computed in f32 and rounded back once.
///
/// This is what the kernel computes for bf16 storage.
///
/// # Errors
/// Returns an error if the tables do not broadcast to `x`.
pub fn apply_rotary_reference_upcast(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let dtype = x.dtype();
    let out = apply_rotary_reference(
        &x.to_dtype(DType::F32)?,
        &cos.to_dtype(DType::F32)?,
        &sin.to_dtype(DType::F32)?,
    )?;
    Ok(out.to_dtype(dtype)?)
}

/// Rotary position embedding.
///
/// Holds full-width cos/sin tables and applies them through the tiled
/// kernel.
#[derive(Debug)]
pub struct RotaryEmbedding {
    /// Cosine cache [`max_seq_len`, `head_dim`]
    cos_cache: Tensor,
    /// Sine cache [`max_seq_len`, `head_dim`]
    sin_cache: Tensor,
    head_dim: usize,
    kernel: TiledRope,
}

impl RotaryEmbedding {
    /// Create rotary embeddings.
    ///
    /// # Arguments
    /// * `head_dim` - Dimension per attention head
    /// * `max_seq_len` - Maximum sequence length to cache
    /// * `base` - Base for frequency computation (typically 10000)
    /// * `device` - Device for tensors
    ///
    /// # Errors
    /// Returns `Configuration` for an odd or zero `head_dim`.
    pub fn new(head_dim: usize, max_seq_len: usize, base: f32, device: &Device) -> Result<Self> {
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(RopeError::config(
                "head_dim",
                format!("{head_dim} must be a non-zero even number"),
            ));
        }

        // Compute inverse frequencies
        let inv_freq: Vec<f32> = (0..head_dim)
            .step_by(2)
            .map(|i| 1.0 / base.powf(i as f32 / head_dim as f32))
            .collect();
        let inv_freq = Tensor::from_vec(inv_freq, (1, head_dim / 2), device)?;

        let positions: Vec<f32> = (0..max_seq_len).map(|i| i as f32).collect();
        let positions = Tensor::from_vec(positions, (max_seq_len, 1), device)?;

        // [max_seq_len, head_dim/2], then both halves share the frequencies
        let freqs = positions.matmul(&inv_freq)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], 1)?;

        Ok(Self {
            cos_cache: freqs.cos()?,
            sin_cache: freqs.sin()?,
            head_dim,
            kernel: TiledRope::new(KernelConfig::default()),
        })
    }

    /// Use `config` for kernel launches.
    #[must_use]
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.kernel = TiledRope::new(config);
        self
    }

    /// Head dimension the tables were built for.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// `cos` and `sin` for the first `seq_len` positions, `[seq_len, head_dim]`
    /// in `dtype`.
    ///
    /// # Errors
    /// Returns `Configuration` if `seq_len` exceeds the cache.
    pub fn tables(&self, seq_len: usize, dtype: DType) -> Result<(Tensor, Tensor)> {
        let cached = self.cos_cache.dim(0)?;
        if seq_len > cached {
            return Err(RopeError::config(
                "seq_len",
                format!("{seq_len} exceeds the {cached} cached positions"),
            ));
        }
        let cos = self.cos_cache.narrow(0, 0, seq_len)?.to_dtype(dtype)?;
        let sin = self.sin_cache.narrow(0, 0, seq_len)?.to_dtype(dtype)?;
        Ok((cos, sin))
    }

    /// Apply rotary embedding to `x` `[batch, heads, seq_len, head_dim]`.
    ///
    /// Tiles are whole rows: the most rows that divide both a lane and one
    /// head's sequence and still fit the staging budget.
    ///
    /// # Errors
    /// Returns an error if `x` is not 4-D with the cached `head_dim`, or if
    /// the kernel rejects the launch.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, heads, seq_len, head_dim) = x.dims4()?;
        if head_dim != self.head_dim {
            return Err(RopeError::ShapeMismatch {
                expected: vec![batch, heads, seq_len, self.head_dim],
                actual: x.dims().to_vec(),
            });
        }

        let (cos, sin) = self.tables(seq_len, x.dtype())?;
        let cos = cos.reshape((1, 1, seq_len, head_dim))?;
        let sin = sin.reshape((1, 1, seq_len, head_dim))?;
        let cos = cos.broadcast_as(x.shape())?.contiguous()?;
        let sin = sin.broadcast_as(x.shape())?.contiguous()?;

        let config = self.kernel.config();
        let format = FormatCode::from_dtype(x.dtype(), Layout::Flat)?;
        let rows_per_lane = (batch * heads * seq_len) / (config.lanes as usize).max(1);
        let rows = tile_rows(
            format,
            head_dim,
            gcd(rows_per_lane, seq_len),
            config.staging_bytes,
        );
        self.kernel
            .launch_exact(x, &cos, &sin, Layout::Flat, head_dim, rows * head_dim)
    }
}

/// Largest divisor of `rows` whose tile fits in `staging_bytes`, or 1 if
/// none does.
fn tile_rows(format: FormatCode, head_dim: usize, rows: usize, staging_bytes: usize) -> usize {
    (1..=rows)
        .rev()
        .filter(|r| rows % r == 0)
        .find(|r| estimate_staging_bytes(format, head_dim, r * head_dim) <= staging_bytes)
        .unwrap_or(1)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
