//! Device-resident tensors and index vectors.
//!
//! Storage is reference-counted: views into one owning allocation (the
//! backward pass hands out per-member slices of a single gradient slab)
//! share the same buffer with a different element offset and shape.

use std::sync::Arc;

use groupsel_common::{Device, GroupSelError, Result};

use crate::backend::{Accelerator, DeviceBuffer};

/// A dense, contiguous, row-major `f32` tensor on one accelerator device.
pub struct DeviceTensor<A: Accelerator> {
    buf: Arc<A::Buffer>,
    offset: usize,
    shape: Vec<usize>,
    device: Device,
}

impl<A: Accelerator> Clone for DeviceTensor<A> {
    fn clone(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
            offset: self.offset,
            shape: self.shape.clone(),
            device: self.device,
        }
    }
}

impl<A: Accelerator> std::fmt::Debug for DeviceTensor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTensor")
            .field("offset", &self.offset)
            .field("shape", &self.shape)
            .field("device", &self.device)
            .finish()
    }
}

impl<A: Accelerator> DeviceTensor<A> {
    /// Upload `data` as a tensor of the given shape.
    pub fn from_slice(acc: &A, data: &[f32], shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "data length {} does not match shape {:?} ({} elements)",
                    data.len(),
                    shape,
                    numel
                ),
            });
        }
        let buf = acc.upload(data)?;
        Ok(Self { buf: Arc::new(buf), offset: 0, shape: shape.to_vec(), device: acc.device() })
    }

    /// Allocate a zero-filled tensor of the given shape.
    pub fn zeros(acc: &A, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let buf = acc.alloc_zeroed(numel)?;
        Ok(Self { buf: Arc::new(buf), offset: 0, shape: shape.to_vec(), device: acc.device() })
    }

    /// Allocate a tensor whose contents will be fully overwritten by the
    /// kernel that consumes it.
    pub(crate) fn alloc_output(acc: &A, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let buf = acc.alloc(numel)?;
        Ok(Self { buf: Arc::new(buf), offset: 0, shape: shape.to_vec(), device: acc.device() })
    }

    /// View into an existing allocation at an element offset.
    pub(crate) fn view(
        buf: Arc<A::Buffer>,
        offset: usize,
        shape: Vec<usize>,
        device: Device,
    ) -> Self {
        Self { buf, offset, shape, device }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Product of all trailing dimensions: the column count after the 2-D
    /// reshape `(rows, cols)` used by the batched kernel.
    pub(crate) fn trailing_cols(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Raw device address of the first element of this view.
    pub fn device_addr(&self) -> u64 {
        self.buf.device_addr() + (self.offset * std::mem::size_of::<f32>()) as u64
    }

    pub(crate) fn buffer(&self) -> &Arc<A::Buffer> {
        &self.buf
    }

    /// Read the tensor contents back to the host in row-major order.
    pub fn to_vec(&self, acc: &A) -> Result<Vec<f32>> {
        acc.download(&self.buf, self.offset, self.numel())
    }
}

/// An integer index vector on one accelerator device.
///
/// Carries a full shape even though dispatch requires rank-1, so the rank
/// contract is validated at dispatch time rather than assumed.
pub struct DeviceIndices<A: Accelerator> {
    buf: Arc<A::IntBuffer>,
    shape: Vec<usize>,
    device: Device,
}

impl<A: Accelerator> Clone for DeviceIndices<A> {
    fn clone(&self) -> Self {
        Self { buf: Arc::clone(&self.buf), shape: self.shape.clone(), device: self.device }
    }
}

impl<A: Accelerator> DeviceIndices<A> {
    /// Upload a rank-1 index vector.
    pub fn from_slice(acc: &A, data: &[i64]) -> Result<Self> {
        let buf = acc.upload_indices(data)?;
        Ok(Self { buf: Arc::new(buf), shape: vec![data.len()], device: acc.device() })
    }

    /// Upload index data with an explicit shape. Dispatch rejects anything
    /// that is not rank-1; this constructor exists so that callers relaying
    /// arbitrary index tensors hit that validation instead of silently
    /// flattening.
    pub fn from_slice_with_shape(acc: &A, data: &[i64], shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(GroupSelError::ShapeMismatch {
                reason: format!(
                    "index data length {} does not match shape {:?} ({} elements)",
                    data.len(),
                    shape,
                    numel
                ),
            });
        }
        let buf = acc.upload_indices(data)?;
        Ok(Self { buf: Arc::new(buf), shape: shape.to_vec(), device: acc.device() })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of indices (the selection count `m` for rank-1 vectors).
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Raw device address of the first index.
    pub fn device_addr(&self) -> u64 {
        self.buf.device_addr()
    }

    pub(crate) fn buffer(&self) -> &Arc<A::IntBuffer> {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostAccelerator;

    #[test]
    fn from_slice_rejects_shape_mismatch() {
        let acc = HostAccelerator::new();
        let err = DeviceTensor::from_slice(&acc, &[1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(err, GroupSelError::ShapeMismatch { .. }));
    }

    #[test]
    fn round_trip_preserves_layout() {
        let acc = HostAccelerator::new();
        let data: Vec<f32> = (0..12).map(|x| x as f32).collect();
        let t = DeviceTensor::from_slice(&acc, &data, &[3, 4]).unwrap();
        assert_eq!(t.rank(), 2);
        assert_eq!(t.numel(), 12);
        assert_eq!(t.trailing_cols(), 4);
        assert_eq!(t.to_vec(&acc).unwrap(), data);
    }

    #[test]
    fn rank_one_tensor_has_one_column() {
        let acc = HostAccelerator::new();
        let t = DeviceTensor::from_slice(&acc, &[1.0, 2.0], &[2]).unwrap();
        assert_eq!(t.trailing_cols(), 1);
    }

    #[test]
    fn indices_default_rank_one() {
        let acc = HostAccelerator::new();
        let idx = DeviceIndices::from_slice(&acc, &[0, 2, 1]).unwrap();
        assert_eq!(idx.rank(), 1);
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn indices_with_explicit_shape() {
        let acc = HostAccelerator::new();
        let idx = DeviceIndices::from_slice_with_shape(&acc, &[0, 1, 2, 3], &[2, 2]).unwrap();
        assert_eq!(idx.rank(), 2);
        assert!(DeviceIndices::from_slice_with_shape(&acc, &[0, 1], &[3]).is_err());
    }
}
