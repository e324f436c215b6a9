//! Differentiable entry point for the grouped gather.
//!
//! Two surfaces are exposed:
//!
//! - [`group_index_select`] runs the forward pass and returns the outputs
//!   together with a single-use [`GroupSelectBackward`] handle. Consuming
//!   the handle is the only way to run backward, so reusing stale saved
//!   state is unrepresentable.
//! - [`GroupIndexSelect`] wraps the same pair behind the two-call protocol
//!   a differentiation engine drives (`apply`, then `apply_grad` exactly
//!   once); protocol violations fail with an explicit
//!   [`StateMisuse`](groupsel_common::GroupSelError::StateMisuse) error
//!   instead of silently reusing stale pointers.

use groupsel_common::{GroupSelError, Result};

use crate::backend::Accelerator;
use crate::backward::{self, SavedBackward};
use crate::forward;
use crate::tensor::{DeviceIndices, DeviceTensor};

/// Gather rows from every member of a group with one batched launch.
///
/// `inputs[i]` is gathered with `indices[i]`; all members must share one
/// selection count, one rank, and one device. Returns the per-member
/// outputs (shaped like the inputs with the leading dimension replaced by
/// the selection count) and the backward handle. An empty group yields an
/// empty output list and a handle whose backward is also empty.
pub fn group_index_select<A: Accelerator>(
    acc: &A,
    inputs: &[DeviceTensor<A>],
    indices: &[DeviceIndices<A>],
) -> Result<(Vec<DeviceTensor<A>>, GroupSelectBackward<A>)> {
    let (outputs, saved) = forward::dispatch(acc, inputs, indices)?;
    Ok((outputs, GroupSelectBackward { saved }))
}

/// Single-use handle for the backward half of one grouped dispatch.
///
/// Owns the staged argument table and everything its device addresses
/// refer to; dropping the handle without calling
/// [`apply_grad`](Self::apply_grad) releases them.
pub struct GroupSelectBackward<A: Accelerator> {
    saved: Option<SavedBackward<A>>,
}

impl<A: Accelerator> std::fmt::Debug for GroupSelectBackward<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSelectBackward")
            .field("consumed", &self.saved.is_none())
            .finish()
    }
}

impl<A: Accelerator> GroupSelectBackward<A> {
    /// Scatter-add `grad_outputs` into gradients shaped like the original
    /// inputs. Where an index was selected more than once the contributing
    /// gradient rows accumulate; rows never selected stay zero.
    pub fn apply_grad(
        self,
        acc: &A,
        grad_outputs: &[DeviceTensor<A>],
    ) -> Result<Vec<DeviceTensor<A>>> {
        match self.saved {
            Some(saved) => backward::dispatch(acc, saved, grad_outputs),
            None => {
                if !grad_outputs.is_empty() {
                    return Err(GroupSelError::ShapeMismatch {
                        reason: format!(
                            "expected 0 gradient tensors for an empty group, got {}",
                            grad_outputs.len()
                        ),
                    });
                }
                Ok(Vec::new())
            }
        }
    }

    /// Number of members in the dispatched group.
    pub fn group_size(&self) -> usize {
        self.saved.as_ref().map_or(0, |saved| saved.group_size)
    }
}

/// The grouped gather as a two-call differentiable operation.
///
/// A differentiation engine calls [`apply`](Self::apply) during the
/// forward sweep and [`apply_grad`](Self::apply_grad) during the backward
/// sweep. Each `apply` starts a fresh call instance; `apply_grad` consumes
/// the most recent one.
pub struct GroupIndexSelect<A: Accelerator> {
    pending: Option<GroupSelectBackward<A>>,
}

impl<A: Accelerator> Default for GroupIndexSelect<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Accelerator> GroupIndexSelect<A> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Forward pass; stores the saved state for the matching backward.
    pub fn apply(
        &mut self,
        acc: &A,
        inputs: &[DeviceTensor<A>],
        indices: &[DeviceIndices<A>],
    ) -> Result<Vec<DeviceTensor<A>>> {
        let (outputs, handle) = group_index_select(acc, inputs, indices)?;
        self.pending = Some(handle);
        Ok(outputs)
    }

    /// Backward pass; consumes the saved state of the most recent
    /// [`apply`](Self::apply).
    ///
    /// # Errors
    ///
    /// `StateMisuse` when no forward is pending, i.e. `apply` was never
    /// called or `apply_grad` already consumed its state.
    pub fn apply_grad(
        &mut self,
        acc: &A,
        grad_outputs: &[DeviceTensor<A>],
    ) -> Result<Vec<DeviceTensor<A>>> {
        let handle = self.pending.take().ok_or_else(|| GroupSelError::StateMisuse {
            reason: "apply_grad requires a matching apply; the saved state was never \
                     created or has already been consumed"
                .into(),
        })?;
        handle.apply_grad(acc, grad_outputs)
    }

    /// True while a forward's saved state is waiting for its backward.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
