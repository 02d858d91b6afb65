// queue-ops/core/ops/src/lib.rs

// Blocking bounded blobs queue and the operators that drive it
pub mod config;
pub mod logging;
pub mod metrics;
pub mod operator;
pub mod ops;
pub mod queue;
pub mod record;
pub mod registry;
pub mod tensor;
pub mod types;
pub mod workspace;

pub use config::WorkspaceConfig;
pub use operator::{
    Argument, DeviceOption, DeviceType, NetDef, Operator, OperatorDef, OperatorRegistry,
};
pub use queue::{BlobsQueue, DequeueOutcome, EnqueueOutcome};
pub use record::{BlobRecord, CompletionFence, Fence};
pub use registry::QueueRegistry;
pub use tensor::{Device, Tensor};
pub use types::{OperatorError, QueueError, QueueStats};
pub use workspace::{Blob, Net, Workspace};
