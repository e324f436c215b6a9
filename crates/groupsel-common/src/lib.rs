//! Common types for the groupsel engine.
//!
//! This crate provides the foundation shared across the groupsel workspace:
//! the error taxonomy, accelerator device identity, and small math helpers.

pub mod device;
pub mod error;
pub mod math;

pub use device::Device;
pub use error::{GroupSelError, Result};
pub use math::ceil_div;
