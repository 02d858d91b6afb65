// queue-ops/core/ops/src/tensor.rs

// Tensor handles flowing through queues
use ndarray::{ArrayD, IxDyn, ShapeError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a tensor's storage lives
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(u32),
}

impl Device {
    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Gpu(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "gpu:{}", id),
        }
    }
}

/// Shared handle to a dense f32 tensor.
///
/// Cloning a `Tensor` clones the handle, not the data. Writes go through
/// [`Tensor::write`] and are visible to every handle sharing the storage;
/// device runtimes use this to model asynchronous kernels filling a buffer.
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<RwLock<ArrayD<f32>>>,
    device: Device,
}

impl Tensor {
    pub fn from_array(array: ArrayD<f32>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(array)),
            device: Device::Cpu,
        }
    }

    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, ShapeError> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)?;
        Ok(Self::from_array(array))
    }

    pub fn zeros(shape: &[usize], device: Device) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape))).on_device(device)
    }

    /// Rank-0 tensor holding a single value
    pub fn scalar(value: f32) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Re-tag the handle with a device. Storage is not moved.
    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn shape(&self) -> Vec<usize> {
        self.storage.read().shape().to_vec()
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    /// Snapshot of the current contents
    pub fn to_array(&self) -> ArrayD<f32> {
        self.storage.read().clone()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.storage.read().iter().copied().collect()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ArrayD<f32>) -> R) -> R {
        f(&self.storage.read())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut ArrayD<f32>) -> R) -> R {
        f(&mut self.storage.write())
    }

    /// Fresh storage holding a snapshot of the current contents, on the
    /// same device
    pub fn deep_copy(&self) -> Tensor {
        Self::from_array(self.to_array()).on_device(self.device)
    }

    /// True when both handles point at the same storage
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("device", &self.device)
            .finish()
    }
}
