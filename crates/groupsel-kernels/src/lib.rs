//! Grouped, pointer-batched gather/scatter dispatch engine.
//!
//! Given a group of independently shaped 2-D (or higher-rank, flattened)
//! arrays and one index vector per member, the engine gathers the selected
//! rows of every member with **one** kernel launch, and scatter-adds
//! gradients back with one more. Members may differ in row and column
//! counts; what they share is the selection count, the rank, and the
//! device.
//!
//! The hard part is not the gather arithmetic but the batching protocol:
//! per-member metadata (data addresses, column counts, work-unit offsets)
//! is packed into one contiguous staging buffer, transferred once, and the
//! kernel's work units are partitioned across members proportionally to
//! their size. The pieces map onto modules as follows:
//!
//! - [`layout`] computes the packed argument buffer layout and resolves it
//!   against both the host staging memory and the device base address.
//! - [`partition`] converts member shapes into the flat work-unit space.
//! - [`autograd`] exposes the differentiable entry point; the forward and
//!   backward dispatchers behind it fill, stage, and launch.
//! - [`backend`] is the accelerator seam: allocation, one asynchronous
//!   host-to-device copy, one batched kernel entry point.
//! - [`host`] interprets the full protocol on the CPU; the `cuda` feature
//!   adds the real device behind the same trait.
//!
//! ```
//! use groupsel_kernels::{group_index_select, DeviceIndices, DeviceTensor, HostAccelerator};
//!
//! let acc = HostAccelerator::new();
//! let table = DeviceTensor::from_slice(&acc, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
//! let picks = DeviceIndices::from_slice(&acc, &[2, 0]).unwrap();
//!
//! let (outputs, backward) = group_index_select(&acc, &[table], &[picks]).unwrap();
//! assert_eq!(outputs[0].to_vec(&acc).unwrap(), vec![5.0, 6.0, 1.0, 2.0]);
//!
//! let grad = DeviceTensor::from_slice(&acc, &[1.0; 4], &[2, 2]).unwrap();
//! let grads = backward.apply_grad(&acc, &[grad]).unwrap();
//! assert_eq!(grads[0].to_vec(&acc).unwrap(), vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
//! ```

pub mod autograd;
pub mod backend;
pub mod device_probe;
pub mod host;
pub mod layout;
pub mod partition;
pub mod tensor;

mod backward;
mod forward;
mod group;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use autograd::{group_index_select, GroupIndexSelect, GroupSelectBackward};
pub use backend::{Accelerator, DeviceBuffer, GroupedKernelArgs, KernelMode, StagingBuffer};
pub use host::HostAccelerator;
pub use tensor::{DeviceIndices, DeviceTensor};

#[cfg(feature = "cuda")]
pub use cuda::CudaAccelerator;

pub use groupsel_common::{Device, GroupSelError, Result};
