//! Backward dispatch: one batched scatter-add launch per group.
//!
//! Backward does not rebuild the five-section argument buffer. It stages a
//! small two-section pointer table (upstream gradients, gradient views)
//! and reuses the `indices_ptrs`, `warp_offsets`, and `num_cols` device
//! addresses captured by the forward pass, which describe the identical
//! index assignment and work partition. The mapping from work unit to
//! (member, row, column tile) is therefore the same in both passes.

use std::sync::Arc;

use groupsel_common::{Device, GroupSelError, Result};

use crate::backend::{Accelerator, DeviceBuffer, GroupedKernelArgs, KernelMode, StagingBuffer};
use crate::layout::ArgsLayout;
use crate::tensor::DeviceTensor;

/// Owned context carried from one forward dispatch to its matching
/// backward dispatch.
///
/// Holds the staged argument table (pinned host side and device copy) and
/// the member index buffers, because their device addresses are baked into
/// that table; dropping any of them early would leave the backward kernel
/// reading freed memory. Input and output buffers are retained for the
/// duration of the asynchronous forward launch. Consumed exactly once.
pub(crate) struct SavedBackward<A: Accelerator> {
    /// Device addresses of the three metadata sections backward reuses.
    pub(crate) indices_ptrs: u64,
    pub(crate) warp_offsets: u64,
    pub(crate) num_cols: u64,
    /// Ownership that keeps those addresses valid until backward is done.
    pub(crate) _args_staging: A::Staging,
    pub(crate) _args_dev: A::IntBuffer,
    pub(crate) _index_bufs: Vec<Arc<A::IntBuffer>>,
    pub(crate) _input_bufs: Vec<Arc<A::Buffer>>,
    pub(crate) _output_bufs: Vec<Arc<A::Buffer>>,
    /// Original input shapes, for reconstructing gradient views.
    pub(crate) input_shapes: Vec<Vec<usize>>,
    pub(crate) group_size: usize,
    pub(crate) selection_count: usize,
    pub(crate) total_num_warps: i64,
    pub(crate) use_var_cols: bool,
    pub(crate) device: Device,
}

/// Run the grouped backward pass, consuming the saved context.
pub(crate) fn dispatch<A: Accelerator>(
    acc: &A,
    saved: SavedBackward<A>,
    grad_outputs: &[DeviceTensor<A>],
) -> Result<Vec<DeviceTensor<A>>> {
    let group_size = saved.group_size;
    if grad_outputs.len() != group_size {
        return Err(GroupSelError::ShapeMismatch {
            reason: format!(
                "expected {group_size} gradient tensors, got {}",
                grad_outputs.len()
            ),
        });
    }

    for (i, grad) in grad_outputs.iter().enumerate() {
        if grad.device() != saved.device {
            return Err(GroupSelError::DeviceMismatch {
                reason: format!(
                    "gradient for member {i} lives on {} but the group was dispatched on {}",
                    grad.device(),
                    saved.device
                ),
            });
        }
        let mut expected = saved.input_shapes[i].clone();
        expected[0] = saved.selection_count;
        if grad.shape() != expected.as_slice() {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "gradient for member {i} has shape {:?}, expected {:?}",
                    grad.shape(),
                    expected
                ),
            });
        }
    }

    // One zero-initialized allocation covering every member's gradient,
    // instead of group_size separate allocations and fill kernels.
    let numels: Vec<usize> =
        saved.input_shapes.iter().map(|shape| shape.iter().product()).collect();
    let total_numel: usize = numels.iter().sum();
    let slab = Arc::new(acc.alloc_zeroed(total_numel)?);

    // Partition the slab into contiguous per-member views, in member order.
    let mut grad_inputs = Vec::with_capacity(group_size);
    let mut offset = 0usize;
    for (shape, numel) in saved.input_shapes.iter().zip(&numels) {
        grad_inputs.push(DeviceTensor::view(
            Arc::clone(&slab),
            offset,
            shape.clone(),
            saved.device,
        ));
        offset += numel;
    }

    let layout = ArgsLayout::backward(group_size);
    let mut staging = acc.alloc_staging(layout.total_slots())?;
    {
        let views = layout.split_backward(staging.as_mut_slice());
        for i in 0..group_size {
            views.grad_output_ptrs[i] = grad_outputs[i].device_addr() as i64;
            views.grad_input_ptrs[i] = grad_inputs[i].device_addr() as i64;
        }
    }
    let args_dev = acc.stage_to_device(&staging)?;
    let dev = layout.resolve_backward(args_dev.device_addr());

    let args = GroupedKernelArgs {
        input_ptrs: dev.grad_output_ptrs,
        output_ptrs: dev.grad_input_ptrs,
        indices_ptrs: saved.indices_ptrs,
        warp_offsets: saved.warp_offsets,
        num_cols: saved.num_cols,
        selection_count: saved.selection_count,
        total_num_warps: saved.total_num_warps,
        group_size,
        use_var_cols: saved.use_var_cols,
    };
    log::debug!(
        "grouped scatter-add backward: group_size={group_size}, m={}, \
         total_num_warps={}",
        saved.selection_count,
        saved.total_num_warps
    );
    acc.launch_grouped(KernelMode::Accumulate, &args)?;

    Ok(grad_inputs)
}
