// queue-ops/core/ops-gpu/src/lib.rs

// Device build of the blobs queue operators
pub mod device;
pub mod ops;
pub mod stream;
pub mod types;

pub use device::{DeviceContext, GpuRuntime};
pub use ops::{register_gpu_ops, registry_with_gpu_ops, GpuDequeueBlobsOp, GpuEnqueueBlobsOp};
pub use stream::{DeviceStream, StreamEvent};
pub use types::{FenceMode, GpuConfig, GpuError};
