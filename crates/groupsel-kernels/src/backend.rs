//! Accelerator collaborator interface.
//!
//! The dispatchers never talk to CUDA (or any other device runtime)
//! directly. They consume exactly three primitives, expressed by the
//! [`Accelerator`] trait: memory allocation (device-resident plus pinned
//! host staging), an asynchronous host-to-device copy, and one batched
//! kernel entry point that accepts the five-section pointer layout.
//!
//! Two implementations exist: [`HostAccelerator`](crate::host::HostAccelerator)
//! interprets the packed-pointer protocol on the CPU and is always
//! available, and the `cuda` feature adds a cudarc-backed device.
//!
//! # Ordering contract
//!
//! All work submitted through one accelerator executes in submission order
//! on a single execution stream. [`Accelerator::stage_to_device`] and
//! [`Accelerator::launch_grouped`] are asynchronous with respect to the
//! calling thread; a launch is guaranteed to observe any staging copy
//! enqueued before it. Nothing blocks the caller except
//! [`Accelerator::download`] and [`Accelerator::synchronize`].

use groupsel_common::{Device, Result};

/// Which pass the batched kernel performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelMode {
    /// Forward gather: `output[r] = input[indices[r]]` per member.
    Select,
    /// Backward scatter-add: `grad_input[indices[r]] += grad_output[r]`
    /// per member. Duplicate indices accumulate.
    Accumulate,
}

/// Arguments for one batched kernel launch.
///
/// The five address fields point at the metadata sections of the packed
/// argument buffer, already resolved against its device-side base address.
/// In `Select` mode the source tables are the member inputs and the
/// destination tables the member outputs; in `Accumulate` mode the source
/// tables hold upstream gradients and the destinations the zero-filled
/// gradient views.
#[derive(Debug, Clone)]
pub struct GroupedKernelArgs {
    /// Device address of the per-member source-data pointer table.
    pub input_ptrs: u64,
    /// Device address of the per-member destination pointer table.
    pub output_ptrs: u64,
    /// Device address of the per-member index pointer table.
    pub indices_ptrs: u64,
    /// Device address of the `group_size + 1` warp-offset table.
    pub warp_offsets: u64,
    /// Device address of the packed per-member column-count table.
    pub num_cols: u64,
    /// Selection count `m`, identical across the group.
    pub selection_count: usize,
    /// Total number of work units across the whole group.
    pub total_num_warps: i64,
    /// Number of group members.
    pub group_size: usize,
    /// True when members disagree on column count. Devices may use this to
    /// pick a specialized kernel; the per-member table is authoritative.
    pub use_var_cols: bool,
}

/// Device-resident storage handle with a stable raw address.
pub trait DeviceBuffer {
    /// Number of elements in the buffer.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw address of the first element in the accelerator's address
    /// space. Stable for the lifetime of the buffer; the packed argument
    /// tables store these values verbatim.
    fn device_addr(&self) -> u64;
}

/// Pinned host staging buffer of 64-bit metadata slots.
///
/// Filled host-side through [`StagingBuffer::as_mut_slice`], then copied
/// to the device once per dispatch. The buffer must outlive every kernel
/// launch that consumes its device copy; the saved backward context owns
/// it across the forward/backward boundary.
pub trait StagingBuffer {
    /// Capacity in 64-bit slots.
    fn slots(&self) -> usize;

    /// Host-visible view for filling the metadata sections.
    fn as_mut_slice(&mut self) -> &mut [i64];
}

/// One accelerator device: allocator, staging transfer, and the batched
/// gather/scatter kernel entry point.
pub trait Accelerator {
    /// Device-resident `f32` storage.
    type Buffer: DeviceBuffer;
    /// Device-resident `i64` storage (index arrays and staged metadata).
    type IntBuffer: DeviceBuffer;
    /// Pinned host staging for metadata slots.
    type Staging: StagingBuffer;

    /// Identity of this device.
    fn device(&self) -> Device;

    /// Allocate `numel` `f32` elements. Contents are unspecified; every
    /// covered element is overwritten by the kernel that consumes it.
    fn alloc(&self, numel: usize) -> Result<Self::Buffer>;

    /// Allocate `numel` zero-initialized `f32` elements.
    fn alloc_zeroed(&self, numel: usize) -> Result<Self::Buffer>;

    /// Copy `data` into a fresh device buffer.
    fn upload(&self, data: &[f32]) -> Result<Self::Buffer>;

    /// Copy `data` into a fresh device index buffer.
    fn upload_indices(&self, data: &[i64]) -> Result<Self::IntBuffer>;

    /// Read `len` elements starting at `offset` back to the host. Blocks
    /// until all previously submitted work has completed.
    fn download(&self, buf: &Self::Buffer, offset: usize, len: usize) -> Result<Vec<f32>>;

    /// Allocate a pinned host staging buffer of `slots` 64-bit slots.
    fn alloc_staging(&self, slots: usize) -> Result<Self::Staging>;

    /// Enqueue an asynchronous copy of `staging` into fresh device memory.
    /// Ordered before any later launch on this accelerator.
    fn stage_to_device(&self, staging: &Self::Staging) -> Result<Self::IntBuffer>;

    /// Launch the batched gather/scatter kernel once for the whole group.
    ///
    /// Asynchronous on real devices; a contract violation baked into the
    /// arguments (e.g. an out-of-range index) surfaces as
    /// [`GroupSelError::KernelFault`](groupsel_common::GroupSelError) either
    /// here or at the next [`Accelerator::synchronize`], depending on the
    /// backend's fault-reporting channel.
    fn launch_grouped(&self, mode: KernelMode, args: &GroupedKernelArgs) -> Result<()>;

    /// Block until all enqueued work has completed, surfacing any deferred
    /// fault.
    fn synchronize(&self) -> Result<()>;
}
