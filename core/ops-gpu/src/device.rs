// queue-ops/core/ops-gpu/src/device.rs

// Device contexts: one stream on one device, plus the runtime that owns them
use crate::stream::DeviceStream;
use crate::types::{FenceMode, GpuConfig, GpuError};
use queue_ops::{Device, Tensor};
use std::sync::Arc;
use tracing::info;

/// A device paired with the stream operators on it launch work onto
#[derive(Debug)]
pub struct DeviceContext {
    device: Device,
    stream_id: usize,
    stream: DeviceStream,
}

impl DeviceContext {
    pub fn new(device_id: u32, stream_id: usize) -> Result<Self, GpuError> {
        let device = Device::Gpu(device_id);
        let stream = DeviceStream::new(device, &format!("stream{}", stream_id))?;
        Ok(Self {
            device,
            stream_id,
            stream,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    pub fn stream(&self) -> &DeviceStream {
        &self.stream
    }

    /// Zero-initialized tensor resident on this device
    pub fn alloc(&self, shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, self.device)
    }

    /// Launch a kernel on this context's stream
    pub fn launch(&self, kernel: impl FnOnce() + Send + 'static) -> Result<(), GpuError> {
        self.stream.launch(kernel)
    }

    /// Asynchronous host-to-device copy. The returned tensor is only valid
    /// for work ordered after this stream's current position.
    pub fn copy_to_device(&self, host: &Tensor) -> Result<Tensor, GpuError> {
        if host.device() != Device::Cpu {
            return Err(GpuError::WrongDevice {
                expected: Device::Cpu,
                actual: host.device(),
            });
        }
        self.copy_on_stream(host)
    }

    /// Device-to-device copy into fresh storage, ordered after everything
    /// already launched on this stream
    pub fn snapshot(&self, tensor: &Tensor) -> Result<Tensor, GpuError> {
        if tensor.device() != self.device {
            return Err(GpuError::WrongDevice {
                expected: self.device,
                actual: tensor.device(),
            });
        }
        self.copy_on_stream(tensor)
    }

    fn copy_on_stream(&self, src: &Tensor) -> Result<Tensor, GpuError> {
        let dst = self.alloc(&src.shape());
        let (src, target) = (src.clone(), dst.clone());
        self.stream.launch(move || {
            let data = src.to_array();
            target.write(|a| *a = data);
        })?;
        Ok(dst)
    }

    /// Synchronizing device-to-host copy
    pub fn copy_to_host(&self, tensor: &Tensor) -> Result<Tensor, GpuError> {
        if tensor.device() != self.device {
            return Err(GpuError::WrongDevice {
                expected: self.device,
                actual: tensor.device(),
            });
        }
        self.stream.synchronize();
        Ok(Tensor::from_array(tensor.to_array()))
    }
}

/// Set of simulated devices, each with a fixed pool of streams
#[derive(Debug)]
pub struct GpuRuntime {
    config: GpuConfig,
    devices: Vec<Vec<Arc<DeviceContext>>>,
}

impl GpuRuntime {
    pub fn new(config: GpuConfig) -> Result<Self, GpuError> {
        config.validate()?;
        let devices = (0..config.device_count)
            .map(|device_id| {
                (0..config.streams_per_device)
                    .map(|stream_id| DeviceContext::new(device_id, stream_id).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            devices = config.device_count,
            streams_per_device = config.streams_per_device,
            fence_mode = ?config.fence_mode,
            "GPU runtime started"
        );
        Ok(Self { config, devices })
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub fn device_count(&self) -> u32 {
        self.config.device_count
    }

    pub fn fence_mode(&self) -> FenceMode {
        self.config.fence_mode
    }

    pub fn context(&self, device_id: u32, stream_id: usize) -> Result<Arc<DeviceContext>, GpuError> {
        let streams = self
            .devices
            .get(device_id as usize)
            .ok_or(GpuError::InvalidDevice {
                device_id,
                device_count: self.config.device_count,
            })?;
        streams
            .get(stream_id)
            .cloned()
            .ok_or(GpuError::InvalidStream {
                device_id,
                stream_id,
                stream_count: streams.len(),
            })
    }

    /// Block until every stream on every device is idle
    pub fn synchronize_all(&self) {
        for context in self.devices.iter().flatten() {
            context.stream().synchronize();
        }
    }
}
