//! Compile-time and runtime accelerator availability checks.
//!
//! Consolidates the compile-time feature gate with runtime hardware
//! detection so callers can decide between the CUDA accelerator and the
//! host reference backend with one call. The `GROUPSEL_GPU_FAKE`
//! environment variable overrides runtime detection for deterministic
//! tests: `cuda` forces availability, `none` forces unavailability.

/// True when CUDA support was compiled into this binary. Does not check
/// runtime availability.
pub fn cuda_compiled() -> bool {
    cfg!(feature = "cuda")
}

/// True when a CUDA device can actually be used right now.
pub fn cuda_available() -> bool {
    match std::env::var("GROUPSEL_GPU_FAKE").as_deref() {
        Ok("cuda") => return true,
        Ok("none") => return false,
        _ => {}
    }
    cuda_available_uncached()
}

#[cfg(feature = "cuda")]
fn cuda_available_uncached() -> bool {
    crate::cuda::CudaAccelerator::is_available()
}

#[cfg(not(feature = "cuda"))]
fn cuda_available_uncached() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_matches_feature_gate() {
        assert_eq!(cuda_compiled(), cfg!(feature = "cuda"));
    }

    #[test]
    fn fake_override_forces_unavailable() {
        std::env::set_var("GROUPSEL_GPU_FAKE", "none");
        assert!(!cuda_available());
        std::env::remove_var("GROUPSEL_GPU_FAKE");
    }
}
