//! Group assembly and fail-fast validation.
//!
//! All checks run host-side before any allocation or device submission, so
//! a rejected group leaves no observable state behind.

use groupsel_common::{Device, GroupSelError, Result};

use crate::backend::Accelerator;
use crate::tensor::{DeviceIndices, DeviceTensor};

/// Validated properties shared by every member of a group.
pub(crate) struct GroupSpec {
    /// Selection count `m`, identical across the group.
    pub selection_count: usize,
    /// Device every member lives on.
    pub device: Device,
}

pub(crate) fn validate_group<A: Accelerator>(
    acc: &A,
    inputs: &[DeviceTensor<A>],
    indices: &[DeviceIndices<A>],
) -> Result<GroupSpec> {
    debug_assert!(!indices.is_empty(), "empty groups are handled before validation");

    let rank = inputs[0].rank();
    if rank == 0 {
        return Err(GroupSelError::ShapeMismatch {
            reason: "group members must have at least one dimension to select rows from".into(),
        });
    }

    let selection_count = indices[0].len();
    let device = acc.device();

    for (i, (input, index)) in inputs.iter().zip(indices).enumerate() {
        if index.rank() != 1 {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!("index tensor must be 1-D: member {i} has rank {}", index.rank()),
            });
        }
        if input.rank() != rank {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "all inputs in a group must have the same number of dimensions: \
                     member {i} has rank {}, member 0 has rank {rank}",
                    input.rank()
                ),
            });
        }
        if index.len() != selection_count {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "the number of indices to be selected must be the same for the \
                     entire group: member {i} selects {}, member 0 selects {selection_count}",
                    index.len()
                ),
            });
        }
        if input.device() != device || index.device() != device {
            return Err(GroupSelError::DeviceMismatch {
                reason: format!(
                    "member {i} lives on {} / {} but the dispatching accelerator is {device}",
                    input.device(),
                    index.device()
                ),
            });
        }
    }

    Ok(GroupSpec { selection_count, device })
}
