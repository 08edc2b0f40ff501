// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Candle front end for the tiled kernel.
//!
//! [`TiledRope`] takes 4-D `[outer, heads, seq, width]` tensors, broadcasts
//! the tables, derives the launch scalars and runs the kernel on the
//! tensor's elements. The result lands on the device of `x`.
//!
//! ## Example
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use rope_tiled::kernels::{KernelConfig, TiledRope};
//!
//! # fn main() -> rope_tiled::Result<()> {
//! let device = Device::Cpu;
//! let x = Tensor::ones((1, 1, 2, 64), DType::F32, &device)?;
//! let cos = Tensor::ones((1, 1, 2, 64), DType::F32, &device)?;
//! let sin = Tensor::zeros((1, 1, 2, 64), DType::F32, &device)?;
//!
//! let rope = TiledRope::new(KernelConfig::single_lane());
//! let out = rope.apply(&x, &cos, &sin, 128)?;
//! assert_eq!(out.dims(), x.dims());
//! # Ok(())
//! # }
//! ```

use candle_core::{DType, Tensor};
use half::{bf16, f16};

use crate::error::{Result, RopeError};
use crate::kernels::compute::Element;
use crate::kernels::config::{KernelConfig, LaunchArgs};
use crate::kernels::driver::launch;
use crate::kernels::format::{FormatCode, Layout, Precision};
use crate::kernels::transfer::{PACKED_GROUPS, PADDED_HEAD_DIM};

/// Tiled `RoPE` operator over candle tensors.
#[derive(Debug, Clone, Default)]
pub struct TiledRope {
    config: KernelConfig,
}

impl TiledRope {
    /// Create an operator with the given launch configuration.
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        Self { config }
    }

    /// Launch configuration in use.
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Rotate `x` along its last axis.
    ///
    /// # Arguments
    /// * `x` - Activations `[outer, heads, seq, head_dim]`
    /// * `cos`, `sin` - Tables, either shaped like `x` or with a 1 on the
    ///   heads or sequence axis
    /// * `tiling_length` - Requested elements per tile
    ///
    /// # Errors
    /// Returns an error if shapes or dtypes disagree or the launch
    /// preconditions fail for the derived tile length.
    pub fn apply(
        &self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        tiling_length: usize,
    ) -> Result<Tensor> {
        self.run(x, cos, sin, tiling_length, Layout::Flat)
    }

    /// Rotate three interleaved groups of `width / 3` along the last axis
    /// of `x`, each with its own slice of the tables.
    ///
    /// # Errors
    /// Same as [`TiledRope::apply`], plus `Configuration` if the last axis
    /// is not divisible by three.
    pub fn apply_packed(
        &self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        tiling_length: usize,
    ) -> Result<Tensor> {
        self.run(x, cos, sin, tiling_length, Layout::Packed)
    }

    fn run(
        &self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        tiling_length: usize,
        layout: Layout,
    ) -> Result<Tensor> {
        let (_, _, _, width) = x.dims4()?;
        for table in [cos, sin] {
            if table.dtype() != x.dtype() {
                return Err(RopeError::Format(format!(
                    "table dtype {:?} differs from x dtype {:?}",
                    table.dtype(),
                    x.dtype()
                )));
            }
        }

        let head_dim = match layout {
            Layout::Flat => width,
            Layout::Packed => {
                if width % PACKED_GROUPS != 0 {
                    return Err(RopeError::config(
                        "head_dim",
                        format!("packed width {width} is not three groups"),
                    ));
                }
                width / PACKED_GROUPS
            }
        };

        let (cos, sin) = broadcast_tables(x, cos, sin)?;
        let tile_length = adjust_tile_length(x.elem_count(), head_dim, tiling_length);
        self.launch_exact(x, &cos, &sin, layout, head_dim, tile_length)
    }

    /// Launch on tables already shaped like `x`, with `tile_length` taken
    /// as given.
    pub(crate) fn launch_exact(
        &self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        layout: Layout,
        head_dim: usize,
        tile_length: usize,
    ) -> Result<Tensor> {
        let format = FormatCode::from_dtype(x.dtype(), layout)?;
        let args = LaunchArgs {
            total_length: x.elem_count(),
            head_dim,
            tile_length,
            format_code: format.code(),
        };

        #[cfg(feature = "cuda")]
        {
            if x.device().is_cuda()
                && layout == Layout::Flat
                && format.precision == Precision::Single
                && super::cubecl::has_cubecl_cuda_support()
            {
                return super::cubecl::cubecl_rope(&x.contiguous()?, cos, sin, head_dim);
            }
        }

        match format.precision {
            Precision::Half => self.launch_typed::<f16>(x, cos, sin, &args),
            Precision::BFloat16 => self.launch_typed::<bf16>(x, cos, sin, &args),
            Precision::Single => self.launch_typed::<f32>(x, cos, sin, &args),
        }
    }

    fn launch_typed<T: Element>(
        &self,
        x: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
        args: &LaunchArgs,
    ) -> Result<Tensor> {
        let xs = x.flatten_all()?.to_vec1::<T>()?;
        let cs = cos.flatten_all()?.to_vec1::<T>()?;
        let ss = sin.flatten_all()?.to_vec1::<T>()?;
        let mut out = vec![T::default(); args.total_length];

        launch(&xs, &cs, &ss, &mut out, args, &self.config)?;
        Ok(Tensor::from_vec(out, x.dims(), x.device())?)
    }
}

/// Repeat `cos`/`sin` up to the shape of `x`.
///
/// Tables already shaped like `x` are returned as they are. Otherwise they
/// are repeated along the heads axis when theirs is 1, and along the
/// sequence axis when it is not.
///
/// # Errors
/// Returns `ShapeMismatch` if the repeated tables still differ from `x`.
pub fn broadcast_tables(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<(Tensor, Tensor)> {
    let (_, heads, seq, _) = x.dims4()?;
    let broadcast = |table: &Tensor| -> Result<Tensor> {
        if table.dims() == x.dims() {
            return Ok(table.clone());
        }
        let (_, table_heads, _, _) = table.dims4()?;
        let repeated = if table_heads == 1 {
            table.repeat((1, heads, 1, 1))?
        } else {
            table.repeat((1, 1, seq, 1))?
        };
        if repeated.dims() != x.dims() {
            return Err(RopeError::ShapeMismatch {
                expected: x.dims().to_vec(),
                actual: table.dims().to_vec(),
            });
        }
        Ok(repeated)
    };
    Ok((broadcast(cos)?, broadcast(sin)?))
}

/// Tile length actually launched for a requested one.
///
/// 96-wide heads keep `tile_length` when it divides the row count and
/// halve it otherwise; every other width is left alone.
#[must_use]
pub fn adjust_tile_length(total_length: usize, head_dim: usize, tile_length: usize) -> usize {
    if head_dim != PADDED_HEAD_DIM || tile_length == 0 {
        return tile_length;
    }
    if (total_length / PADDED_HEAD_DIM) % tile_length == 0 {
        tile_length
    } else {
        tile_length / 2
    }
}

/// Raw format code for a tensor dtype and layout.
///
/// # Errors
/// Returns `UnsupportedDtype` for anything but f16, bf16 and f32.
pub fn format_code_for(dtype: DType, layout: Layout) -> Result<u8> {
    FormatCode::from_dtype(dtype, layout).map(FormatCode::code)
}
