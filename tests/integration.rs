//! Integration tests for the tiled RoPE kernel.
//!
//! ## Test Coverage
//!
//! - Flat layout against the tensor-op reference for f32, f16 and bf16
//! - The `[1, 1, 2, 64]` single-lane scenario with unit tables
//! - 96-wide heads: tile halving and padded staging rows
//! - Packed layout against the flat kernel run on each group
//! - Broadcast idempotence and lane-count independence
//! - Raw buffer entry point, format fallback and error reporting
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test integration
//! cargo test --features cuda --test integration
//! ```

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use half::{bf16, f16};
use rope_tiled::kernels::rope::{
    apply_rotary_reference, apply_rotary_reference_upcast, rotate_half,
};
use rope_tiled::kernels::{
    rope, FormatCode, KernelConfig, LaunchArgs, Layout, Precision, RopeBuffers, RotaryEmbedding,
    TiledRope,
};
use rope_tiled::memory::estimate_staging_bytes;
use rope_tiled::RopeError;

mod gpu;
mod helpers;

use helpers::{RopeCase, TestFixtures, ValidationUtils};

fn lanes_for(total: usize, lane_length: usize) -> KernelConfig {
    KernelConfig::default().with_lanes(u32::try_from(total / lane_length).unwrap())
}

// ============================================================================
// FLAT LAYOUT
// ============================================================================

#[test]
fn test_unit_tables_give_x_plus_rotate_half() -> Result<()> {
    let device = Device::Cpu;
    let x = TestFixtures::uniform((1, 1, 2, 64), 3.0, 42, DType::F32)?;
    let ones = Tensor::ones((1, 1, 2, 64), DType::F32, &device)?;

    let rope = TiledRope::new(KernelConfig::single_lane());
    let out = rope.apply(&x, &ones, &ones, 128)?;

    let expected = (&x + rotate_half(&x)?)?;
    ValidationUtils::assert_identical(&out, &expected)?;
    Ok(())
}

#[test]
fn test_flat_f32_matches_reference() -> Result<()> {
    for (name, case) in TestFixtures::flat_scenarios() {
        let (x, cos, sin) = case.tensors(DType::F32)?;
        let rope = TiledRope::new(lanes_for(x.elem_count(), case.tile));
        let out = rope.apply(&x, &cos, &sin, case.tile)?;
        let expected = apply_rotary_reference(&x, &cos, &sin)?;

        let metrics = ValidationUtils::accuracy(&out, &expected)?;
        assert_eq!(metrics.mismatches, 0, "{name}: {metrics:?}");
    }
    Ok(())
}

#[test]
fn test_flat_f16_matches_reference() -> Result<()> {
    for (name, case) in TestFixtures::flat_scenarios() {
        let (x, cos, sin) = case.tensors(DType::F16)?;
        let rope = TiledRope::new(lanes_for(x.elem_count(), case.tile));
        let out = rope.apply(&x, &cos, &sin, case.tile)?;
        assert_eq!(out.dtype(), DType::F16);

        let expected = apply_rotary_reference(&x, &cos, &sin)?;
        let metrics = ValidationUtils::accuracy(&out, &expected)?;
        assert_eq!(metrics.mismatches, 0, "{name}: {metrics:?}");
    }
    Ok(())
}

#[test]
fn test_bf16_rounds_once_from_f32() -> Result<()> {
    let case = RopeCase {
        shape: (2, 4, 16, 64),
        table_shape: (2, 1, 16, 64),
        tile: 1024,
        seed: 99,
    };
    let (x, cos, sin) = case.tensors(DType::BF16)?;
    let rope = TiledRope::new(lanes_for(x.elem_count(), case.tile));
    let out = rope.apply(&x, &cos, &sin, case.tile)?;

    let upcast = apply_rotary_reference_upcast(&x, &cos, &sin)?;
    ValidationUtils::assert_identical(&out, &upcast)?;

    // rounding every intermediate to bf16 gives different numbers
    let naive = apply_rotary_reference(&x, &cos, &sin)?;
    let metrics = ValidationUtils::accuracy(&out, &naive)?;
    assert!(metrics.mismatches > 0);
    assert!(metrics.max_error < 0.1, "{metrics:?}");
    Ok(())
}

#[test]
fn test_lane_count_does_not_change_output() -> Result<()> {
    let case = RopeCase {
        shape: (1, 8, 8, 64),
        table_shape: (1, 1, 8, 64),
        tile: 256,
        seed: 5,
    };
    let (x, cos, sin) = case.tensors(DType::F32)?;
    let single = TiledRope::new(KernelConfig::single_lane()).apply(&x, &cos, &sin, 256)?;
    for lanes in [2, 4, 8, 16] {
        let config = KernelConfig::default().with_lanes(lanes);
        let out = TiledRope::new(config).apply(&x, &cos, &sin, 256)?;
        ValidationUtils::assert_identical(&out, &single)?;
    }
    Ok(())
}

#[test]
fn test_broadcast_is_idempotent() -> Result<()> {
    let case = RopeCase {
        shape: (2, 3, 4, 64),
        table_shape: (2, 1, 4, 64),
        tile: 256,
        seed: 21,
    };
    let (x, cos, sin) = case.tensors(DType::F16)?;
    let rope = TiledRope::new(lanes_for(x.elem_count(), 256));

    let from_small = rope.apply(&x, &cos, &sin, 256)?;
    let full_cos = cos.repeat((1, 3, 1, 1))?;
    let full_sin = sin.repeat((1, 3, 1, 1))?;
    let from_full = rope.apply(&x, &full_cos, &full_sin, 256)?;

    ValidationUtils::assert_identical(&from_small, &from_full)?;
    Ok(())
}

// ============================================================================
// 96-WIDE HEADS
// ============================================================================

#[test]
fn test_head_96_halves_tile_and_leaks_no_padding() -> Result<()> {
    let case = RopeCase {
        shape: (1, 1, 4, 96),
        table_shape: (1, 1, 4, 96),
        tile: 384,
        seed: 3,
    };
    let (x, cos, sin) = case.tensors(DType::F16)?;

    // 2 lanes of 192 elements: only the halved tile fits
    let rope = TiledRope::new(KernelConfig::default().with_lanes(2));
    let out = rope.apply(&x, &cos, &sin, case.tile)?;

    let expected = apply_rotary_reference(&x, &cos, &sin)?;
    ValidationUtils::assert_identical(&out, &expected)?;
    Ok(())
}

#[test]
fn test_head_96_all_precisions() -> Result<()> {
    let case = RopeCase {
        shape: (2, 2, 6, 96),
        table_shape: (2, 1, 6, 96),
        tile: 384,
        seed: 17,
    };
    for dtype in [DType::F16, DType::BF16, DType::F32] {
        let (x, cos, sin) = case.tensors(dtype)?;
        // 24 rows, 384 does not divide it: tile 192, 12 lanes of 192
        let rope = TiledRope::new(KernelConfig::default().with_lanes(12));
        let out = rope.apply(&x, &cos, &sin, case.tile)?;

        let expected = if dtype == DType::BF16 {
            apply_rotary_reference_upcast(&x, &cos, &sin)?
        } else {
            apply_rotary_reference(&x, &cos, &sin)?
        };
        let metrics = ValidationUtils::accuracy(&out, &expected)?;
        assert_eq!(metrics.mismatches, 0, "{dtype:?}: {metrics:?}");
    }
    Ok(())
}

// ============================================================================
// PACKED LAYOUT
// ============================================================================

#[test]
fn test_packed_matches_flat_per_group() -> Result<()> {
    let case = RopeCase {
        shape: (1, 4, 6, 96),
        table_shape: (1, 4, 1, 96),
        tile: 288,
        seed: 31,
    };
    let (x, cos, sin) = case.tensors(DType::F16)?;
    let total = x.elem_count();

    let packed = TiledRope::new(lanes_for(total, 576)).apply_packed(&x, &cos, &sin, case.tile)?;

    let flat = TiledRope::new(lanes_for(total / 3, 192));
    let mut groups = Vec::new();
    for g in 0..3 {
        let xg = x.narrow(3, g * 32, 32)?.contiguous()?;
        let cg = cos.narrow(3, g * 32, 32)?.contiguous()?;
        let sg = sin.narrow(3, g * 32, 32)?.contiguous()?;
        groups.push(flat.apply(&xg, &cg, &sg, 64)?);
    }
    let expected = Tensor::cat(&groups, 3)?;

    ValidationUtils::assert_identical(&packed, &expected)?;
    Ok(())
}

#[test]
fn test_packed_bf16_rounds_once_per_group() -> Result<()> {
    let case = RopeCase {
        shape: (1, 4, 6, 96),
        table_shape: (1, 4, 1, 96),
        tile: 288,
        seed: 37,
    };
    let (x, cos, sin) = case.tensors(DType::BF16)?;

    let config = KernelConfig::default().with_lanes(4);
    let packed = TiledRope::new(config).apply_packed(&x, &cos, &sin, case.tile)?;

    let mut groups = Vec::new();
    for g in 0..3 {
        let xg = x.narrow(3, g * 32, 32)?;
        let cg = cos.narrow(3, g * 32, 32)?;
        let sg = sin.narrow(3, g * 32, 32)?;
        groups.push(apply_rotary_reference_upcast(&xg, &cg, &sg)?);
    }
    let expected = Tensor::cat(&groups, 3)?;

    ValidationUtils::assert_identical(&packed, &expected)?;
    Ok(())
}

#[test]
fn test_packed_rejects_width_not_three_groups() -> Result<()> {
    let x = Tensor::zeros((1, 1, 4, 64), DType::F32, &Device::Cpu)?;
    let err = TiledRope::new(KernelConfig::single_lane())
        .apply_packed(&x, &x, &x, 256)
        .unwrap_err();
    assert!(matches!(
        err,
        RopeError::Configuration {
            dimension: "head_dim",
            ..
        }
    ));
    Ok(())
}

// ============================================================================
// RAW BUFFERS AND FORMAT CODES
// ============================================================================

#[test]
fn test_raw_bf16_buffers() -> Result<()> {
    let x: Vec<bf16> = (0..128).map(|i| bf16::from_f32(i as f32 * 0.5)).collect();
    let ones = vec![bf16::ONE; 128];
    let zeros = vec![bf16::ZERO; 128];
    let mut out = vec![bf16::ZERO; 128];

    let args = LaunchArgs {
        total_length: 128,
        head_dim: 64,
        tile_length: 64,
        format_code: FormatCode::new(Precision::BFloat16, Layout::Flat).code(),
    };
    rope(
        RopeBuffers::BF16 {
            x: &x,
            cos: &ones,
            sin: &zeros,
            out: &mut out,
        },
        &args,
        &KernelConfig::default().with_lanes(2),
    )?;

    // sin = 0, cos = 1: identity
    assert_eq!(out, x);
    Ok(())
}

#[test]
fn test_unknown_code_runs_half_flat() -> Result<()> {
    let x: Vec<f16> = (0..64).map(|i| f16::from_f32(i as f32)).collect();
    let ones = vec![f16::ONE; 64];
    let mut lenient = vec![f16::ZERO; 64];
    let mut half_flat = vec![f16::ZERO; 64];

    let mut args = LaunchArgs {
        total_length: 64,
        head_dim: 32,
        tile_length: 64,
        format_code: 0,
    };
    let config = KernelConfig::single_lane();
    rope(
        RopeBuffers::F16 {
            x: &x,
            cos: &ones,
            sin: &ones,
            out: &mut half_flat,
        },
        &args,
        &config,
    )?;

    args.format_code = 42;
    rope(
        RopeBuffers::F16 {
            x: &x,
            cos: &ones,
            sin: &ones,
            out: &mut lenient,
        },
        &args,
        &config,
    )?;
    assert_eq!(lenient, half_flat);

    let err = rope(
        RopeBuffers::F16 {
            x: &x,
            cos: &ones,
            sin: &ones,
            out: &mut lenient,
        },
        &args,
        &config.with_strict_format(),
    )
    .unwrap_err();
    assert!(matches!(err, RopeError::Format(_)));
    Ok(())
}

#[test]
fn test_buffers_must_match_format() {
    let x = vec![0.0f32; 64];
    let mut out = vec![0.0f32; 64];
    let args = LaunchArgs {
        total_length: 64,
        head_dim: 32,
        tile_length: 64,
        format_code: 1,
    };
    let err = rope(
        RopeBuffers::F32 {
            x: &x,
            cos: &x,
            sin: &x,
            out: &mut out,
        },
        &args,
        &KernelConfig::single_lane(),
    )
    .unwrap_err();
    assert!(matches!(err, RopeError::Format(_)));
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[test]
fn test_configuration_errors_name_the_dimension() -> Result<()> {
    let x = Tensor::zeros((1, 1, 4, 64), DType::F32, &Device::Cpu)?;
    let rope = TiledRope::new(KernelConfig::single_lane());

    let err = rope.apply(&x, &x, &x, 100).unwrap_err();
    assert!(matches!(
        err,
        RopeError::Configuration {
            dimension: "tile_length",
            ..
        }
    ));

    let rope = TiledRope::new(KernelConfig::default());
    let err = rope.apply(&x, &x, &x, 64).unwrap_err();
    assert!(matches!(err, RopeError::Configuration { dimension: "lanes", .. }));
    Ok(())
}

#[test]
fn test_staging_budget_is_enforced() -> Result<()> {
    let x = Tensor::zeros((1, 1, 8, 64), DType::BF16, &Device::Cpu)?;
    let format = FormatCode::new(Precision::BFloat16, Layout::Flat);
    let needed = estimate_staging_bytes(format, 64, 512);

    let exact = KernelConfig::single_lane().with_staging_bytes(needed);
    TiledRope::new(exact).apply(&x, &x, &x, 512)?;

    let short = KernelConfig::single_lane().with_staging_bytes(needed - 1);
    let err = TiledRope::new(short).apply(&x, &x, &x, 512).unwrap_err();
    assert!(matches!(err, RopeError::OutOfMemory { .. }));
    Ok(())
}

#[test]
fn test_unsupported_dtype() -> Result<()> {
    let x = Tensor::zeros((1, 1, 2, 64), DType::F64, &Device::Cpu)?;
    let err = TiledRope::new(KernelConfig::single_lane())
        .apply(&x, &x, &x, 128)
        .unwrap_err();
    assert!(matches!(err, RopeError::UnsupportedDtype(DType::F64)));
    Ok(())
}

// ============================================================================
// ROTARY EMBEDDING
// ============================================================================

#[test]
fn test_rotary_embedding_f16() -> Result<()> {
    let device = Device::Cpu;
    let rope = RotaryEmbedding::new(64, 128, 10000.0, &device)?
        .with_config(KernelConfig::default().with_lanes(4));
    let x = TestFixtures::uniform((1, 4, 32, 64), 1.0, 8, DType::F16)?;

    let out = rope.forward(&x)?;
    let (cos, sin) = rope.tables(32, DType::F16)?;
    let expected = apply_rotary_reference(&x, &cos, &sin)?;
    ValidationUtils::assert_identical(&out, &expected)?;
    Ok(())
}

#[test]
fn test_rotary_embedding_default_config() -> Result<()> {
    let device = Device::Cpu;
    let rope = RotaryEmbedding::new(128, 512, 10000.0, &device)?;
    let x = TestFixtures::uniform((1, 48, 256, 128), 1.0, 9, DType::BF16)?;

    let out = rope.forward(&x)?;
    let (cos, sin) = rope.tables(256, DType::BF16)?;
    let expected = apply_rotary_reference_upcast(&x, &cos, &sin)?;
    ValidationUtils::assert_identical(&out, &expected)?;
    Ok(())
}
