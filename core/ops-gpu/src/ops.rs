// queue-ops/core/ops-gpu/src/ops.rs

// Device-aware EnqueueBlobs / DequeueBlobs
use crate::device::{DeviceContext, GpuRuntime};
use crate::types::FenceMode;
use queue_ops::operator::Argument;
use queue_ops::ops::{
    check_output_arity, dequeue_record_where, enqueue_record, gather_inputs, publish_record,
    register_admin_ops, DequeueBlobsOp, EnqueueBlobsOp, DEQUEUE_BLOBS, ENQUEUE_BLOBS,
};
use queue_ops::{
    BlobRecord, DeviceType, Operator, OperatorDef, OperatorError, OperatorRegistry, Workspace,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ARG_STREAM_ID: &str = "stream_id";
pub const ARG_FENCE_MODE: &str = "fence_mode";

/// Register the GPU queue operators backed by `runtime`
pub fn register_gpu_ops(registry: &mut OperatorRegistry, runtime: Arc<GpuRuntime>) {
    register_admin_ops(registry, DeviceType::Gpu);

    let rt = runtime.clone();
    registry.register(ENQUEUE_BLOBS, DeviceType::Gpu, move |def| {
        Ok(Box::new(GpuEnqueueBlobsOp::from_def(def, &rt)?))
    });
    registry.register(DEQUEUE_BLOBS, DeviceType::Gpu, move |def| {
        Ok(Box::new(GpuDequeueBlobsOp::from_def(def, &runtime)?))
    });
}

/// Registry with both the CPU and GPU queue operators
pub fn registry_with_gpu_ops(runtime: Arc<GpuRuntime>) -> OperatorRegistry {
    let mut registry = OperatorRegistry::with_cpu_ops();
    register_gpu_ops(&mut registry, runtime);
    registry
}

fn resolve_context(
    def: &OperatorDef,
    runtime: &GpuRuntime,
) -> Result<Arc<DeviceContext>, OperatorError> {
    let stream_id = if def.args.contains_key(ARG_STREAM_ID) {
        def.required_usize(ARG_STREAM_ID)?
    } else {
        0
    };
    Ok(runtime.context(def.device_option.device_id, stream_id)?)
}

fn resolve_fence_mode(def: &OperatorDef, runtime: &GpuRuntime) -> Result<FenceMode, OperatorError> {
    match def.args.get(ARG_FENCE_MODE) {
        None => Ok(runtime.fence_mode()),
        Some(Argument::Str(s)) => {
            FenceMode::parse(s).ok_or_else(|| OperatorError::InvalidArgument {
                name: ARG_FENCE_MODE.to_string(),
                reason: format!("unknown fence mode '{}'", s),
            })
        }
        Some(other) => Err(OperatorError::InvalidArgument {
            name: ARG_FENCE_MODE.to_string(),
            reason: format!("expected a string, got {:?}", other),
        }),
    }
}

/// EnqueueBlobs for device-resident tensors.
///
/// Every input must live on the operator's device. Inputs are copied into
/// fresh buffers on the producer stream, so the record never aliases the
/// producer's blobs. Before the record becomes visible to consumers, those
/// copies are either covered by an attached event (`FenceMode::Event`) or
/// drained (`FenceMode::Synchronize`). The stream itself never waits on the
/// queue.
#[derive(Debug)]
pub struct GpuEnqueueBlobsOp {
    inner: EnqueueBlobsOp,
    context: Arc<DeviceContext>,
    fence_mode: FenceMode,
}

impl GpuEnqueueBlobsOp {
    pub fn from_def(def: &OperatorDef, runtime: &GpuRuntime) -> Result<Self, OperatorError> {
        Ok(Self {
            inner: EnqueueBlobsOp::from_def(def)?,
            context: resolve_context(def, runtime)?,
            fence_mode: resolve_fence_mode(def, runtime)?,
        })
    }

    pub fn fence_mode(&self) -> FenceMode {
        self.fence_mode
    }
}

impl Operator for GpuEnqueueBlobsOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        let queue = ws.queue(self.inner.queue())?;
        let blobs = gather_inputs(ws, self.inner.inputs(), self.context.device())?
            .iter()
            .map(|t| self.context.snapshot(t))
            .collect::<Result<Vec<_>, _>>()?;
        let record = BlobRecord::new(blobs);

        let record = match self.fence_mode {
            FenceMode::Event => record.with_fence(Arc::new(self.context.stream().record_event())),
            FenceMode::Synchronize => {
                self.context.stream().synchronize();
                record
            }
        };

        let accepted = enqueue_record(&queue, record, self.inner.timeout(ws))?;
        if !accepted {
            debug!(
                queue = %self.inner.queue(),
                device = %self.context.device(),
                "EnqueueBlobs: queue closed"
            );
        }
        ws.feed_status(self.inner.status(), accepted);
        Ok(())
    }
}

/// DequeueBlobs for a device consumer.
///
/// Only records whose tensors live on this operator's device are taken; a
/// foreign head record stays queued and the operator fails with
/// `DeviceMismatch`. A fenced record gets a device-side wait on the consumer
/// stream before its tensors are published, so any kernel this context
/// launches afterwards observes the producer's completed writes. The host is
/// not blocked.
#[derive(Debug)]
pub struct GpuDequeueBlobsOp {
    inner: DequeueBlobsOp,
    context: Arc<DeviceContext>,
}

impl GpuDequeueBlobsOp {
    pub fn from_def(def: &OperatorDef, runtime: &GpuRuntime) -> Result<Self, OperatorError> {
        Ok(Self {
            inner: DequeueBlobsOp::from_def(def)?,
            context: resolve_context(def, runtime)?,
        })
    }
}

impl Operator for GpuDequeueBlobsOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        let queue = ws.queue(self.inner.queue())?;
        check_output_arity(&queue, self.inner.outputs())?;

        let device = self.context.device();
        let outputs = self.inner.outputs();
        let record = dequeue_record_where(&queue, self.inner.timeout(ws), |record| {
            match record
                .blobs()
                .iter()
                .zip(outputs)
                .find(|(tensor, _)| tensor.device() != device)
            {
                Some((tensor, name)) => Err(OperatorError::DeviceMismatch {
                    blob: name.clone(),
                    expected: device,
                    actual: tensor.device(),
                }),
                None => Ok(()),
            }
        })?;

        // The record is ours now; nothing below may fail and drop it
        if let Some(record) = &record {
            if let Some(fence) = record.fence() {
                if let Err(e) = self.context.stream().wait_fence(fence.clone()) {
                    warn!(%device, "Stream rejected fence wait, blocking host: {}", e);
                    record.wait_ready();
                }
            }
        }
        publish_record(ws, record, self.inner.outputs(), self.inner.status());
        Ok(())
    }
}
