//! `CubeCL` rotate-half kernel against the tiled CPU kernel.

#[cfg(feature = "cuda")]
mod cuda_tests {
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use rope_tiled::kernels::cubecl::cubecl_rope;
    use rope_tiled::kernels::{broadcast_tables, KernelConfig, TiledRope};

    use crate::helpers::{TestFixtures, ValidationUtils};

    #[test]
    fn test_cubecl_matches_tiled_cpu() -> Result<()> {
        crate::require_gpu!();
        let device = Device::new_cuda(0)?;

        let x = TestFixtures::uniform((2, 4, 16, 64), 2.0, 1, DType::F32)?;
        let cos = TestFixtures::uniform((2, 1, 16, 64), 1.0, 2, DType::F32)?;
        let sin = TestFixtures::uniform((2, 1, 16, 64), 1.0, 3, DType::F32)?;

        let cpu = TiledRope::new(KernelConfig::default().with_lanes(8)).apply(&x, &cos, &sin, 1024)?;

        let (cos_full, sin_full) = broadcast_tables(&x, &cos, &sin)?;
        let gpu = cubecl_rope(
            &x.to_device(&device)?,
            &cos_full.to_device(&device)?,
            &sin_full.to_device(&device)?,
            64,
        )?;

        let metrics = ValidationUtils::accuracy(&gpu.to_device(&Device::Cpu)?, &cpu)?;
        assert!(metrics.max_error < 1e-5, "{metrics:?}");
        Ok(())
    }

    #[test]
    fn test_host_routes_cuda_tensors() -> Result<()> {
        crate::require_gpu!();
        let device = Device::new_cuda(0)?;
        let x = Tensor::ones((1, 1, 4, 32), DType::F32, &device)?;
        let ones = Tensor::ones((1, 1, 4, 32), DType::F32, &device)?;

        let out = TiledRope::new(KernelConfig::single_lane()).apply(&x, &ones, &ones, 128)?;
        assert!(out.device().is_cuda());
        // x + rotate_half(x) with x = 1: -1 + 1 on the first half, 2 on the second
        let values: Vec<f32> = out.flatten_all()?.to_vec1()?;
        assert_eq!(values[0], 0.0);
        assert_eq!(values[16], 2.0);
        Ok(())
    }
}
