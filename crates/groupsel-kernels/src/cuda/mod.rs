//! CUDA implementation of the accelerator interface using cudarc 0.17.
//!
//! One context, one default stream. The grouped kernel source is embedded
//! and compiled with NVRTC at accelerator construction; `Select` and
//! `Accumulate` modes map to the two kernel entry points. The staged
//! argument table travels through pinned host memory and a stream-ordered
//! copy, so the kernel launched behind it on the same stream observes the
//! fully transferred table without any host-side synchronization.
//!
//! Contract violations the kernel itself trips over (out-of-bounds
//! indices) surface through the driver at the next synchronization point,
//! as [`GroupSelError::KernelFault`].

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, DevicePtr, LaunchConfig,
    PinnedHostSlice, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;

use groupsel_common::{Device, GroupSelError, Result};

use crate::backend::{Accelerator, DeviceBuffer, GroupedKernelArgs, KernelMode, StagingBuffer};

const KERNEL_SRC: &str = include_str!("kernels/group_index_select.cu");
const FWD_FN: &str = "group_index_select_fwd";
const BWD_FN: &str = "group_index_add_bwd";

/// Threads per block; 32-lane warps, so eight work units per block.
const BLOCK_THREADS: u32 = 256;
const LANES: u64 = 32;

fn gpu_err(context: &str, err: impl std::fmt::Debug) -> GroupSelError {
    GroupSelError::KernelFault { reason: format!("{context}: {err:?}") }
}

fn alloc_err(context: &str, err: impl std::fmt::Debug) -> GroupSelError {
    GroupSelError::AllocationFailure { reason: format!("{context}: {err:?}") }
}

/// Device-resident `f32` buffer.
pub struct CudaBuffer {
    slice: CudaSlice<f32>,
    stream: Arc<CudaStream>,
}

impl DeviceBuffer for CudaBuffer {
    fn len(&self) -> usize {
        self.slice.len()
    }

    fn device_addr(&self) -> u64 {
        let (addr, _record) = self.slice.device_ptr(&self.stream);
        addr as u64
    }
}

/// Device-resident `i64` buffer (indices and staged metadata).
pub struct CudaIntBuffer {
    slice: CudaSlice<i64>,
    stream: Arc<CudaStream>,
}

impl DeviceBuffer for CudaIntBuffer {
    fn len(&self) -> usize {
        self.slice.len()
    }

    fn device_addr(&self) -> u64 {
        let (addr, _record) = self.slice.device_ptr(&self.stream);
        addr as u64
    }
}

/// Pinned host staging for the packed argument table.
pub struct CudaStaging {
    host: PinnedHostSlice<i64>,
}

impl StagingBuffer for CudaStaging {
    fn slots(&self) -> usize {
        self.host.len()
    }

    fn as_mut_slice(&mut self) -> &mut [i64] {
        self.host.as_mut_slice()
    }
}

/// CUDA accelerator: context, default stream, and the compiled grouped
/// kernel pair.
pub struct CudaAccelerator {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    _module: Arc<CudaModule>,
    fwd_fn: CudaFunction,
    bwd_fn: CudaFunction,
    ordinal: usize,
}

impl CudaAccelerator {
    /// Check whether any CUDA device is usable. The driver library being
    /// absent makes cudarc panic, hence the unwind guard.
    pub fn is_available() -> bool {
        std::panic::catch_unwind(|| CudaContext::new(0).is_ok()).unwrap_or(false)
    }

    /// Create an accelerator on device 0.
    pub fn new() -> Result<Self> {
        Self::with_ordinal(0)
    }

    /// Create an accelerator on a specific device.
    pub fn with_ordinal(ordinal: usize) -> Result<Self> {
        log::info!("initializing CUDA grouped-kernel accelerator on device {ordinal}");
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| gpu_err(&format!("failed to create CUDA context for device {ordinal}"), e))?;
        let stream = ctx.default_stream();

        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| gpu_err("failed to compile grouped kernel PTX", e))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| gpu_err("failed to load grouped kernel module", e))?;
        let fwd_fn = module
            .load_function(FWD_FN)
            .map_err(|e| gpu_err("failed to load forward kernel", e))?;
        let bwd_fn = module
            .load_function(BWD_FN)
            .map_err(|e| gpu_err("failed to load backward kernel", e))?;

        Ok(Self { _ctx: ctx, stream, _module: module, fwd_fn, bwd_fn, ordinal })
    }

    fn launch_config(total_num_warps: i64) -> LaunchConfig {
        let warps_per_block = (BLOCK_THREADS as u64) / LANES;
        let blocks = (total_num_warps as u64).div_ceil(warps_per_block).max(1) as u32;
        LaunchConfig { grid_dim: (blocks, 1, 1), block_dim: (BLOCK_THREADS, 1, 1), shared_mem_bytes: 0 }
    }
}

impl Accelerator for CudaAccelerator {
    type Buffer = CudaBuffer;
    type IntBuffer = CudaIntBuffer;
    type Staging = CudaStaging;

    fn device(&self) -> Device {
        Device::Cuda(self.ordinal)
    }

    fn alloc(&self, numel: usize) -> Result<CudaBuffer> {
        // Zero-filled; the consuming kernel overwrites every covered
        // element, but uninitialized device memory is not worth the unsafe.
        self.alloc_zeroed(numel)
    }

    fn alloc_zeroed(&self, numel: usize) -> Result<CudaBuffer> {
        let slice = self
            .stream
            .alloc_zeros::<f32>(numel)
            .map_err(|e| alloc_err(&format!("failed to allocate {numel} f32 on device"), e))?;
        Ok(CudaBuffer { slice, stream: Arc::clone(&self.stream) })
    }

    fn upload(&self, data: &[f32]) -> Result<CudaBuffer> {
        let slice = self
            .stream
            .memcpy_stod(data)
            .map_err(|e| alloc_err("failed to upload f32 data", e))?;
        Ok(CudaBuffer { slice, stream: Arc::clone(&self.stream) })
    }

    fn upload_indices(&self, data: &[i64]) -> Result<CudaIntBuffer> {
        let slice = self
            .stream
            .memcpy_stod(data)
            .map_err(|e| alloc_err("failed to upload index data", e))?;
        Ok(CudaIntBuffer { slice, stream: Arc::clone(&self.stream) })
    }

    fn download(&self, buf: &CudaBuffer, offset: usize, len: usize) -> Result<Vec<f32>> {
        if offset + len > buf.len() {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "download range {offset}..{} exceeds buffer length {}",
                    offset + len,
                    buf.len()
                ),
            });
        }
        let host = self
            .stream
            .memcpy_dtov(&buf.slice)
            .map_err(|e| gpu_err("failed to read buffer back to host", e))?;
        Ok(host[offset..offset + len].to_vec())
    }

    fn alloc_staging(&self, slots: usize) -> Result<CudaStaging> {
        let host = self
            ._ctx
            .alloc_pinned::<i64>(slots)
            .map_err(|e| alloc_err(&format!("failed to allocate {slots} pinned staging slots"), e))?;
        Ok(CudaStaging { host })
    }

    fn stage_to_device(&self, staging: &CudaStaging) -> Result<CudaIntBuffer> {
        let slice = self
            .stream
            .memcpy_stod(staging.host.as_slice())
            .map_err(|e| alloc_err("failed to stage argument table to device", e))?;
        Ok(CudaIntBuffer { slice, stream: Arc::clone(&self.stream) })
    }

    fn launch_grouped(&self, mode: KernelMode, args: &GroupedKernelArgs) -> Result<()> {
        if args.group_size == 0 || args.total_num_warps == 0 {
            return Ok(());
        }
        let func = match mode {
            KernelMode::Select => &self.fwd_fn,
            KernelMode::Accumulate => &self.bwd_fn,
        };
        let cfg = Self::launch_config(args.total_num_warps);
        log::debug!(
            "launching grouped {mode:?} kernel: grid={:?}, group_size={}, total_num_warps={}",
            cfg.grid_dim,
            args.group_size,
            args.total_num_warps
        );

        let selection_count = args.selection_count as i32;
        let total_num_warps = args.total_num_warps;
        let group_size = args.group_size as i32;

        let mut builder = self.stream.launch_builder(func);
        builder.arg(&args.input_ptrs);
        builder.arg(&args.output_ptrs);
        builder.arg(&args.indices_ptrs);
        builder.arg(&args.warp_offsets);
        builder.arg(&args.num_cols);
        builder.arg(&selection_count);
        builder.arg(&total_num_warps);
        builder.arg(&group_size);

        unsafe { builder.launch(cfg) }
            .map_err(|e| gpu_err("failed to launch grouped kernel", e))
    }

    fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| gpu_err("deferred fault surfaced at stream synchronization", e))
    }
}
