//! Forward dispatch: one batched gather launch for a whole group.
//!
//! The sequence mirrors the protocol exactly: validate, lay out the packed
//! argument buffer, fill it host-side while allocating outputs and
//! accumulating warp offsets, transfer it once, resolve the same layout
//! against the device base, and issue a single `Select` launch. Everything
//! the backward pass will need, including ownership that keeps the staged
//! table and the index buffers alive, is captured into [`SavedBackward`].

use std::sync::Arc;

use groupsel_common::{GroupSelError, Result};

use crate::backend::{Accelerator, DeviceBuffer, GroupedKernelArgs, KernelMode, StagingBuffer};
use crate::backward::SavedBackward;
use crate::group::validate_group;
use crate::layout::ArgsLayout;
use crate::partition::WarpPartition;
use crate::tensor::{DeviceIndices, DeviceTensor};

/// Run the grouped forward pass.
///
/// Returns the per-member outputs and, for non-empty groups, the saved
/// backward context. An empty group succeeds trivially without touching
/// the accelerator.
pub(crate) fn dispatch<A: Accelerator>(
    acc: &A,
    inputs: &[DeviceTensor<A>],
    indices: &[DeviceIndices<A>],
) -> Result<(Vec<DeviceTensor<A>>, Option<SavedBackward<A>>)> {
    if inputs.len() != indices.len() {
        return Err(GroupSelError::ShapeMismatch {
            reason: format!(
                "group size mismatch: {} inputs vs {} index tensors",
                inputs.len(),
                indices.len()
            ),
        });
    }
    let group_size = indices.len();
    if group_size == 0 {
        return Ok((Vec::new(), None));
    }

    let spec = validate_group(acc, inputs, indices)?;
    let m = spec.selection_count;

    let layout = ArgsLayout::forward(group_size);
    let mut staging = acc.alloc_staging(layout.total_slots())?;

    let mut outputs: Vec<DeviceTensor<A>> = Vec::with_capacity(group_size);
    let mut input_shapes = Vec::with_capacity(group_size);
    let mut partition = WarpPartition::with_capacity(group_size);
    let first_cols = inputs[0].trailing_cols();
    let mut use_var_cols = false;

    {
        let views = layout.split_forward(staging.as_mut_slice());
        for (i, (input, index)) in inputs.iter().zip(indices).enumerate() {
            let cols = input.trailing_cols();
            if cols != first_cols {
                use_var_cols = true;
            }

            let mut out_shape = input.shape().to_vec();
            out_shape[0] = m;
            let output = DeviceTensor::alloc_output(acc, &out_shape)?;

            views.input_ptrs[i] = input.device_addr() as i64;
            views.output_ptrs[i] = output.device_addr() as i64;
            views.indices_ptrs[i] = index.device_addr() as i64;
            views.warp_offsets[i] = partition.push_member(cols, m);
            views.num_cols[i] = cols as i32;

            input_shapes.push(input.shape().to_vec());
            outputs.push(output);
        }
        views.warp_offsets[group_size] = partition.total();
    }
    let total_num_warps = partition.total();

    // One transfer for the whole group; the kernel is ordered behind it on
    // the same stream.
    let args_dev = acc.stage_to_device(&staging)?;
    let dev = layout.resolve_forward(args_dev.device_addr());

    let args = GroupedKernelArgs {
        input_ptrs: dev.input_ptrs,
        output_ptrs: dev.output_ptrs,
        indices_ptrs: dev.indices_ptrs,
        warp_offsets: dev.warp_offsets,
        num_cols: dev.num_cols,
        selection_count: m,
        total_num_warps,
        group_size,
        use_var_cols,
    };
    log::debug!(
        "grouped gather forward: group_size={group_size}, m={m}, \
         total_num_warps={total_num_warps}, use_var_cols={use_var_cols}"
    );
    acc.launch_grouped(KernelMode::Select, &args)?;

    let saved = SavedBackward {
        indices_ptrs: dev.indices_ptrs,
        warp_offsets: dev.warp_offsets,
        num_cols: dev.num_cols,
        _args_staging: staging,
        _args_dev: args_dev,
        _index_bufs: indices.iter().map(|index| Arc::clone(index.buffer())).collect(),
        _input_bufs: inputs.iter().map(|input| Arc::clone(input.buffer())).collect(),
        _output_bufs: outputs.iter().map(|output| Arc::clone(output.buffer())).collect(),
        input_shapes,
        group_size,
        selection_count: m,
        total_num_warps,
        use_var_cols,
        device: spec.device,
    };

    Ok((outputs, Some(saved)))
}
