//! Accelerator device identity.

use std::fmt;

/// Identity of the accelerator a buffer lives on.
///
/// Group validation compares devices for equality: members may be batched
/// into one dispatch only when all of them live on the same device. The
/// host reference accelerator carries an ordinal as well, so co-location
/// checks behave identically on every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host reference accelerator with the given ordinal.
    Host(usize),
    /// CUDA device with the given ordinal.
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Host(ordinal) => write!(f, "host:{ordinal}"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}
