// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Numeric format codes.
//!
//! A launch carries a single `u8` selecting both the storage precision and
//! the tensor layout:
//!
//! | code | precision | layout |
//! |------|-----------|--------|
//! | 0    | f16       | flat   |
//! | 1    | bf16 (f32 compute) | flat |
//! | 2    | f32       | flat   |
//! | 3    | f16       | packed |
//! | 4    | bf16 (f32 compute) | packed |
//! | 5    | f32       | packed |

use candle_core::DType;

use crate::error::{Result, RopeError};

/// Offset added to the base code for the packed-triple layout.
pub const PACKED_CODE_OFFSET: u8 = 3;

/// Storage precision of the tensors handed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// IEEE half precision, computed natively.
    Half,
    /// bfloat16 storage, computed in f32 and rounded back.
    BFloat16,
    /// IEEE single precision, computed natively.
    Single,
}

impl Precision {
    /// Size of one stored element in bytes.
    #[must_use]
    pub const fn storage_bytes(self) -> usize {
        match self {
            Self::Half | Self::BFloat16 => 2,
            Self::Single => 4,
        }
    }

    /// Whether this precision runs the upcast path and needs f32 scratch.
    #[must_use]
    pub const fn needs_scratch(self) -> bool {
        matches!(self, Self::BFloat16)
    }

    const fn base_code(self) -> u8 {
        match self {
            Self::Half => 0,
            Self::BFloat16 => 1,
            Self::Single => 2,
        }
    }
}

/// How the rows of a tile sit in global memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Rows of `head_dim` elements back to back.
    Flat,
    /// Rows of three interleaved `head_dim`-wide groups.
    Packed,
}

/// Decoded numeric format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatCode {
    /// Storage precision.
    pub precision: Precision,
    /// Tensor layout.
    pub layout: Layout,
}

impl Default for FormatCode {
    fn default() -> Self {
        Self::new(Precision::Half, Layout::Flat)
    }
}

impl FormatCode {
    /// Build a format from its parts.
    #[must_use]
    pub const fn new(precision: Precision, layout: Layout) -> Self {
        Self { precision, layout }
    }

    /// Decode a raw code, `None` if it is out of range.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        let layout = if code < PACKED_CODE_OFFSET {
            Layout::Flat
        } else {
            Layout::Packed
        };
        let precision = match code % PACKED_CODE_OFFSET {
            0 => Precision::Half,
            1 => Precision::BFloat16,
            _ => Precision::Single,
        };
        if code < 2 * PACKED_CODE_OFFSET {
            Some(Self::new(precision, layout))
        } else {
            None
        }
    }

    /// Decode a raw code as the kernel entry does.
    ///
    /// Out-of-range codes run as half/flat unless `strict` is set.
    ///
    /// # Errors
    /// Returns `Format` for an out-of-range code when `strict` is set.
    pub fn resolve(code: u8, strict: bool) -> Result<Self> {
        match Self::from_code(code) {
            Some(format) => Ok(format),
            None if strict => Err(RopeError::Format(format!(
                "format code {code} is out of range 0..{}",
                2 * PACKED_CODE_OFFSET
            ))),
            None => {
                tracing::warn!(code, "unrecognized format code, running half/flat");
                Ok(Self::default())
            }
        }
    }

    /// Map a tensor dtype and layout to a format.
    ///
    /// # Errors
    /// Returns `UnsupportedDtype` for anything but f16, bf16 and f32.
    pub fn from_dtype(dtype: DType, layout: Layout) -> Result<Self> {
        let precision = match dtype {
            DType::F16 => Precision::Half,
            DType::BF16 => Precision::BFloat16,
            DType::F32 => Precision::Single,
            other => return Err(RopeError::UnsupportedDtype(other)),
        };
        Ok(Self::new(precision, layout))
    }

    /// Raw code for this format.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self.layout {
            Layout::Flat => self.precision.base_code(),
            Layout::Packed => self.precision.base_code() + PACKED_CODE_OFFSET,
        }
    }
}
