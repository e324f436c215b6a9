//! Host reference accelerator.
//!
//! Interprets the packed-pointer protocol on the CPU with real addresses:
//! buffers are stable heap slabs, the staged argument table is copied into
//! a separate "device" slab (modelling the host-to-device hop, so the
//! kernel never reads staging memory), and the grouped kernel walks work
//! units exactly as the device kernel contract specifies. A wrong section
//! offset or a wrong warp partition corrupts results here the same way it
//! would on a GPU, which is what makes this backend useful for testing the
//! protocol rather than just the arithmetic.
//!
//! Execution is synchronous, which trivially satisfies the submission-order
//! guarantee of the [`Accelerator`] contract. Like the device kernel, the
//! interpreter trusts the caller's index values: a negative index is
//! detected and reported as a `KernelFault` (the synchronous analogue of
//! the accelerator's asynchronous fault channel); an index at or past the
//! member's row count is a caller contract violation the kernel cannot
//! detect, exactly as on real hardware.

use std::cell::UnsafeCell;

use groupsel_common::{Device, GroupSelError, Result};

use crate::backend::{Accelerator, DeviceBuffer, GroupedKernelArgs, KernelMode, StagingBuffer};
use crate::partition::warps_per_row;

/// Heap slab of `f32` cells with a stable address.
///
/// Interior mutability is required because the grouped kernel writes
/// through raw addresses while callers hold shared handles to the same
/// buffer; the dispatch protocol guarantees each in-flight launch
/// exclusive logical ownership of the elements it writes.
pub struct HostBuffer {
    cells: Box<[UnsafeCell<f32>]>,
}

// The dispatch protocol serializes access: one launch owns the buffers it
// writes for the duration of the (synchronous) call.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    fn filled(numel: usize, value: f32) -> Self {
        Self { cells: (0..numel).map(|_| UnsafeCell::new(value)).collect() }
    }

    fn from_data(data: &[f32]) -> Self {
        Self { cells: data.iter().map(|&v| UnsafeCell::new(v)).collect() }
    }
}

impl DeviceBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn device_addr(&self) -> u64 {
        self.cells.as_ptr() as u64
    }
}

/// Heap slab of `i64` cells with a stable address.
pub struct HostIntBuffer {
    cells: Box<[UnsafeCell<i64>]>,
}

unsafe impl Send for HostIntBuffer {}
unsafe impl Sync for HostIntBuffer {}

impl HostIntBuffer {
    fn from_data(data: &[i64]) -> Self {
        Self { cells: data.iter().map(|&v| UnsafeCell::new(v)).collect() }
    }
}

impl DeviceBuffer for HostIntBuffer {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn device_addr(&self) -> u64 {
        self.cells.as_ptr() as u64
    }
}

/// Host staging memory. Ordinary heap memory is its own pinned memory on
/// this backend.
pub struct HostStaging {
    slots: Box<[i64]>,
}

impl StagingBuffer for HostStaging {
    fn slots(&self) -> usize {
        self.slots.len()
    }

    fn as_mut_slice(&mut self) -> &mut [i64] {
        &mut self.slots
    }
}

/// CPU implementation of the accelerator collaborator interface.
pub struct HostAccelerator {
    ordinal: usize,
}

impl HostAccelerator {
    pub fn new() -> Self {
        Self { ordinal: 0 }
    }

    /// A host accelerator with a distinct ordinal counts as a distinct
    /// device for co-location checks.
    pub fn with_ordinal(ordinal: usize) -> Self {
        Self { ordinal }
    }
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for HostAccelerator {
    type Buffer = HostBuffer;
    type IntBuffer = HostIntBuffer;
    type Staging = HostStaging;

    fn device(&self) -> Device {
        Device::Host(self.ordinal)
    }

    fn alloc(&self, numel: usize) -> Result<HostBuffer> {
        Ok(HostBuffer::filled(numel, 0.0))
    }

    fn alloc_zeroed(&self, numel: usize) -> Result<HostBuffer> {
        Ok(HostBuffer::filled(numel, 0.0))
    }

    fn upload(&self, data: &[f32]) -> Result<HostBuffer> {
        Ok(HostBuffer::from_data(data))
    }

    fn upload_indices(&self, data: &[i64]) -> Result<HostIntBuffer> {
        Ok(HostIntBuffer::from_data(data))
    }

    fn download(&self, buf: &HostBuffer, offset: usize, len: usize) -> Result<Vec<f32>> {
        if offset + len > buf.len() {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "download range {offset}..{} exceeds buffer length {}",
                    offset + len,
                    buf.len()
                ),
            });
        }
        // SAFETY: range checked above; reads go through the cells' interior.
        Ok((offset..offset + len).map(|i| unsafe { *buf.cells[i].get() }).collect())
    }

    fn alloc_staging(&self, slots: usize) -> Result<HostStaging> {
        Ok(HostStaging { slots: vec![0i64; slots].into_boxed_slice() })
    }

    fn stage_to_device(&self, staging: &HostStaging) -> Result<HostIntBuffer> {
        Ok(HostIntBuffer::from_data(&staging.slots))
    }

    fn launch_grouped(&self, mode: KernelMode, args: &GroupedKernelArgs) -> Result<()> {
        if args.group_size == 0 || args.total_num_warps == 0 {
            return Ok(());
        }
        log::trace!(
            "host grouped kernel: mode={mode:?}, group_size={}, total_num_warps={}",
            args.group_size,
            args.total_num_warps
        );
        // SAFETY: the section addresses point into the staged device table
        // and the member buffers, all of which the in-flight dispatch keeps
        // alive and logically owns until this call returns.
        unsafe { run_grouped(mode, args) }
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// Reference interpretation of the batched kernel.
///
/// Mirrors the device contract: walk the flat work-unit ids, find the
/// owning member in the warp-offset table, decode (row, column tile), and
/// move one tile of one row per unit. Work units are self-contained, so
/// any execution order would produce the same result; the serial loop here
/// makes scatter-add accumulation trivially race-free.
unsafe fn run_grouped(mode: KernelMode, args: &GroupedKernelArgs) -> Result<()> {
    use crate::partition::COLS_PER_WARP;

    let g = args.group_size;
    let input_ptrs = std::slice::from_raw_parts(args.input_ptrs as usize as *const i64, g);
    let output_ptrs = std::slice::from_raw_parts(args.output_ptrs as usize as *const i64, g);
    let indices_ptrs = std::slice::from_raw_parts(args.indices_ptrs as usize as *const i64, g);
    let warp_offsets = std::slice::from_raw_parts(args.warp_offsets as usize as *const i64, g + 1);
    let num_cols = std::slice::from_raw_parts(args.num_cols as usize as *const i32, g);

    for warp_id in 0..args.total_num_warps {
        // Owning member: the last entry at or below this unit id. Members
        // that contribute no work units have empty intervals and are never
        // selected.
        let member = warp_offsets.partition_point(|&offset| offset <= warp_id) - 1;

        let cols = num_cols[member] as usize;
        let wpr = warps_per_row(cols);
        if wpr == 0 {
            return Err(GroupSelError::KernelFault {
                reason: format!(
                    "work unit {warp_id} mapped to member {member} with zero columns; \
                     warp-offset table is corrupt"
                ),
            });
        }

        let local = warp_id - warp_offsets[member];
        let row = (local / wpr as i64) as usize;
        let tile = (local % wpr as i64) as usize;
        let col_start = tile * COLS_PER_WARP;
        let col_end = usize::min(col_start + COLS_PER_WARP, cols);

        let index_ptr = indices_ptrs[member] as usize as *const i64;
        let picked = *index_ptr.add(row);
        if picked < 0 {
            return Err(GroupSelError::KernelFault {
                reason: format!(
                    "negative index {picked} at member {member} row {row}"
                ),
            });
        }
        let picked = picked as usize;

        let src_base = input_ptrs[member] as usize as *const f32;
        let dst_base = output_ptrs[member] as usize as *mut f32;
        match mode {
            KernelMode::Select => {
                let src = src_base.add(picked * cols);
                let dst = dst_base.add(row * cols);
                for c in col_start..col_end {
                    *dst.add(c) = *src.add(c);
                }
            }
            KernelMode::Accumulate => {
                let src = src_base.add(row * cols);
                let dst = dst_base.add(picked * cols);
                for c in col_start..col_end {
                    *dst.add(c) += *src.add(c);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_have_stable_distinct_addresses() {
        let acc = HostAccelerator::new();
        let a = acc.upload(&[1.0, 2.0]).unwrap();
        let b = acc.upload(&[3.0, 4.0]).unwrap();
        assert_ne!(a.device_addr(), b.device_addr());
        let addr = a.device_addr();
        assert_eq!(a.device_addr(), addr);
    }

    #[test]
    fn download_respects_offset_and_bounds() {
        let acc = HostAccelerator::new();
        let buf = acc.upload(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(acc.download(&buf, 1, 2).unwrap(), vec![2.0, 3.0]);
        assert!(acc.download(&buf, 3, 2).is_err());
    }

    #[test]
    fn staging_round_trips_through_device_copy() {
        let acc = HostAccelerator::new();
        let mut staging = acc.alloc_staging(4).unwrap();
        staging.as_mut_slice().copy_from_slice(&[1, -2, 3, -4]);
        let dev = acc.stage_to_device(&staging).unwrap();
        assert_eq!(dev.len(), 4);
        // The device copy is distinct storage; mutating staging afterwards
        // must not affect it.
        staging.as_mut_slice()[0] = 99;
        let first = unsafe { *((dev.device_addr() as usize as *const i64).add(0)) };
        assert_eq!(first, 1);
    }

    #[test]
    fn empty_launch_is_a_no_op() {
        let acc = HostAccelerator::new();
        let args = GroupedKernelArgs {
            input_ptrs: 0,
            output_ptrs: 0,
            indices_ptrs: 0,
            warp_offsets: 0,
            num_cols: 0,
            selection_count: 0,
            total_num_warps: 0,
            group_size: 0,
            use_var_cols: false,
        };
        acc.launch_grouped(KernelMode::Select, &args).unwrap();
    }

    #[test]
    fn distinct_ordinals_are_distinct_devices() {
        assert_ne!(HostAccelerator::new().device(), HostAccelerator::with_ordinal(1).device());
    }
}
