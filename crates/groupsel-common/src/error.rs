//! Error taxonomy for the grouped gather/scatter engine.
//!
//! Validation errors (`ShapeMismatch`, `DeviceMismatch`, `StateMisuse`) are
//! raised host-side before any allocation or device submission, so a failed
//! call leaves no partial state behind. `AllocationFailure` aborts the call
//! that triggered it. `KernelFault` covers faults reported by the
//! accelerator itself, which on asynchronous devices may only surface at the
//! next stream synchronization.

use thiserror::Error;

/// Errors surfaced by the grouped gather/scatter engine.
#[derive(Debug, Error)]
pub enum GroupSelError {
    /// Index tensor not rank-1, inconsistent member rank, or inconsistent
    /// selection count across the group.
    #[error("shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// Group members are not co-located on one accelerator device.
    #[error("device mismatch: {reason}")]
    DeviceMismatch { reason: String },

    /// Backward invoked without a matching forward, or invoked twice on the
    /// same saved state.
    #[error("state misuse: {reason}")]
    StateMisuse { reason: String },

    /// Host or device memory exhaustion while allocating a staging buffer,
    /// an output, or the gradient slab.
    #[error("allocation failure: {reason}")]
    AllocationFailure { reason: String },

    /// Fault reported by the accelerator, e.g. an out-of-bounds index. Not
    /// retried: index-bounds violations are caller contract violations.
    #[error("kernel fault: {reason}")]
    KernelFault { reason: String },
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, GroupSelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_reason() {
        let err = GroupSelError::ShapeMismatch { reason: "rank 2 != rank 3".into() };
        assert_eq!(err.to_string(), "shape mismatch: rank 2 != rank 3");

        let err = GroupSelError::StateMisuse { reason: "backward called twice".into() };
        assert!(err.to_string().starts_with("state misuse:"));
    }
}
