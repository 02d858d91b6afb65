// queue-ops/core/ops-gpu/src/types.rs

use queue_ops::{Device, OperatorError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Invalid device {device_id}: runtime has {device_count} devices")]
    InvalidDevice { device_id: u32, device_count: u32 },

    #[error("Invalid stream {stream_id} on gpu:{device_id}: device has {stream_count} streams")]
    InvalidStream {
        device_id: u32,
        stream_id: usize,
        stream_count: usize,
    },

    #[error("Stream on {0} is no longer accepting work")]
    StreamClosed(Device),

    #[error("Tensor lives on {actual}, expected {expected}")]
    WrongDevice { expected: Device, actual: Device },

    #[error("Failed to start stream worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Invalid GPU config: {0}")]
    InvalidConfig(String),
}

impl From<GpuError> for OperatorError {
    fn from(err: GpuError) -> Self {
        OperatorError::Device(err.to_string())
    }
}

/// How a producer makes its device writes visible to consumers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceMode {
    /// Attach a stream event to the record; consumers order their work after it
    #[default]
    Event,
    /// Drain the producer stream before the record is pushed
    Synchronize,
}

impl FenceMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "event" => Some(FenceMode::Event),
            "synchronize" | "sync" => Some(FenceMode::Synchronize),
            _ => None,
        }
    }
}

/// Simulated device runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub device_count: u32,
    pub streams_per_device: usize,
    pub fence_mode: FenceMode,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            streams_per_device: 2,
            fence_mode: FenceMode::Event,
        }
    }
}

impl GpuConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), GpuError> {
        if self.device_count == 0 {
            return Err(GpuError::InvalidConfig(
                "device_count must be positive".into(),
            ));
        }
        if self.streams_per_device == 0 {
            return Err(GpuError::InvalidConfig(
                "streams_per_device must be positive".into(),
            ));
        }
        Ok(())
    }
}
