// queue-ops/core/ops/src/ops.rs

// CPU queue operators: CreateBlobsQueue, EnqueueBlobs, DequeueBlobs, CloseBlobsQueue
use crate::operator::{DeviceType, Operator, OperatorDef, OperatorRegistry};
use crate::queue::{BlobsQueue, DequeueOutcome, EnqueueOutcome};
use crate::record::BlobRecord;
use crate::tensor::{Device, Tensor};
use crate::types::{OperatorError, QueueError};
use crate::workspace::Workspace;
use std::time::Duration;
use tracing::debug;

pub const CREATE_BLOBS_QUEUE: &str = "CreateBlobsQueue";
pub const ENQUEUE_BLOBS: &str = "EnqueueBlobs";
pub const DEQUEUE_BLOBS: &str = "DequeueBlobs";
pub const CLOSE_BLOBS_QUEUE: &str = "CloseBlobsQueue";

pub const ARG_CAPACITY: &str = "capacity";
pub const ARG_NUM_BLOBS: &str = "num_blobs";
pub const ARG_TIMEOUT_SECS: &str = "timeout_secs";

pub fn register_cpu_ops(registry: &mut OperatorRegistry) {
    register_admin_ops(registry, DeviceType::Cpu);
    registry.register(ENQUEUE_BLOBS, DeviceType::Cpu, |def| {
        Ok(Box::new(EnqueueBlobsOp::from_def(def)?))
    });
    registry.register(DEQUEUE_BLOBS, DeviceType::Cpu, |def| {
        Ok(Box::new(DequeueBlobsOp::from_def(def)?))
    });
}

/// Register the device-independent create/close operators for `device_type`.
/// Queues always live in host memory, so the same implementation serves
/// every device family.
pub fn register_admin_ops(registry: &mut OperatorRegistry, device_type: DeviceType) {
    registry.register(CREATE_BLOBS_QUEUE, device_type, |def| {
        Ok(Box::new(CreateBlobsQueueOp::from_def(def)?))
    });
    registry.register(CLOSE_BLOBS_QUEUE, device_type, |def| {
        Ok(Box::new(CloseBlobsQueueOp::from_def(def)?))
    });
}

/// Push a record, honoring an optional timeout.
///
/// `Ok(false)` means the queue is closed. A timeout surfaces as
/// `OperatorError::TimedOut` and leaves the queue untouched.
pub fn enqueue_record(
    queue: &BlobsQueue,
    record: BlobRecord,
    timeout: Option<Duration>,
) -> Result<bool, OperatorError> {
    let Some(timeout) = timeout else {
        return Ok(queue.enqueue(record)?);
    };
    match queue.enqueue_timeout(record, timeout)? {
        EnqueueOutcome::Accepted => Ok(true),
        EnqueueOutcome::Closed(_) => Ok(false),
        EnqueueOutcome::TimedOut(_) => Err(OperatorError::TimedOut(queue.name().to_string())),
    }
}

/// Pop a record, honoring an optional timeout. `Ok(None)` is end-of-stream.
pub fn dequeue_record(
    queue: &BlobsQueue,
    timeout: Option<Duration>,
) -> Result<Option<BlobRecord>, OperatorError> {
    dequeue_record_where(queue, timeout, |_| Ok(()))
}

/// Like [`dequeue_record`], but a head record `check` refuses is left in
/// the queue and the refusal is returned.
pub fn dequeue_record_where(
    queue: &BlobsQueue,
    timeout: Option<Duration>,
    check: impl Fn(&BlobRecord) -> Result<(), OperatorError>,
) -> Result<Option<BlobRecord>, OperatorError> {
    match queue.dequeue_checked(timeout, check)? {
        DequeueOutcome::Record(record) => Ok(Some(record)),
        DequeueOutcome::EndOfStream => Ok(None),
        DequeueOutcome::TimedOut => Err(OperatorError::TimedOut(queue.name().to_string())),
    }
}

/// Fetch named tensors, requiring each to live on `device`
pub fn gather_inputs(
    ws: &Workspace,
    names: &[String],
    device: Device,
) -> Result<Vec<Tensor>, OperatorError> {
    names
        .iter()
        .map(|name| {
            let tensor = ws.fetch_tensor(name)?;
            if tensor.device() != device {
                return Err(OperatorError::DeviceMismatch {
                    blob: name.clone(),
                    expected: device,
                    actual: tensor.device(),
                });
            }
            Ok(tensor)
        })
        .collect()
}

/// Fail before popping when the output slots cannot hold a record
pub fn check_output_arity(queue: &BlobsQueue, outputs: &[String]) -> Result<(), OperatorError> {
    if queue.record_arity() != outputs.len() {
        return Err(QueueError::ArityMismatch {
            expected: queue.record_arity(),
            actual: outputs.len(),
        }
        .into());
    }
    Ok(())
}

/// Write a dequeued record to `outputs`, or leave them untouched on
/// end-of-stream, then set the status blob.
pub fn publish_record(
    ws: &Workspace,
    record: Option<BlobRecord>,
    outputs: &[String],
    status: &str,
) {
    match record {
        Some(record) => {
            for (name, tensor) in outputs.iter().zip(record.into_blobs()) {
                ws.feed_blob(name, tensor);
            }
            ws.feed_status(status, true);
        }
        None => ws.feed_status(status, false),
    }
}

/// Creates (or attaches to) a named queue.
///
/// Outputs: `[queue]`. Arguments: `capacity`, `num_blobs`.
#[derive(Debug, Clone)]
pub struct CreateBlobsQueueOp {
    queue: String,
    capacity: usize,
    record_arity: usize,
}

impl CreateBlobsQueueOp {
    pub fn from_def(def: &OperatorDef) -> Result<Self, OperatorError> {
        if !def.inputs.is_empty() || def.outputs.len() != 1 {
            return Err(def.invalid("expects no inputs and exactly one output (the queue)"));
        }
        Ok(Self {
            queue: def.outputs[0].clone(),
            capacity: def.required_usize(ARG_CAPACITY)?,
            record_arity: def.required_usize(ARG_NUM_BLOBS)?,
        })
    }
}

impl Operator for CreateBlobsQueueOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        ws.queues()
            .get_or_create(&self.queue, self.capacity, self.record_arity)?;
        Ok(())
    }
}

/// Inputs: `[queue]`
#[derive(Debug, Clone)]
pub struct CloseBlobsQueueOp {
    queue: String,
}

impl CloseBlobsQueueOp {
    pub fn from_def(def: &OperatorDef) -> Result<Self, OperatorError> {
        if def.inputs.len() != 1 || !def.outputs.is_empty() {
            return Err(def.invalid("expects exactly one input (the queue) and no outputs"));
        }
        Ok(Self {
            queue: def.inputs[0].clone(),
        })
    }
}

impl Operator for CloseBlobsQueueOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        ws.queue(&self.queue)?.close();
        Ok(())
    }
}

/// Inputs: `[queue, t_1 .. t_n]`. Outputs: `[status]`, `true` when the
/// record was accepted and `false` once the queue is closed.
#[derive(Debug, Clone)]
pub struct EnqueueBlobsOp {
    queue: String,
    inputs: Vec<String>,
    status: String,
    timeout: Option<Duration>,
}

impl EnqueueBlobsOp {
    pub fn from_def(def: &OperatorDef) -> Result<Self, OperatorError> {
        if def.inputs.len() < 2 {
            return Err(def.invalid("expects the queue followed by at least one blob"));
        }
        if def.outputs.len() != 1 {
            return Err(def.invalid("expects exactly one output (the status)"));
        }
        Ok(Self {
            queue: def.inputs[0].clone(),
            inputs: def.inputs[1..].to_vec(),
            status: def.outputs[0].clone(),
            timeout: def.optional_timeout(ARG_TIMEOUT_SECS)?,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Operator timeout, falling back to the workspace default
    pub fn timeout(&self, ws: &Workspace) -> Option<Duration> {
        self.timeout.or_else(|| ws.config().operator_timeout())
    }
}

impl Operator for EnqueueBlobsOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        let queue = ws.queue(&self.queue)?;
        // The queue owns its records: snapshot inputs so later writes to the
        // producer's blobs cannot reach a queued record
        let blobs = gather_inputs(ws, &self.inputs, Device::Cpu)?
            .iter()
            .map(Tensor::deep_copy)
            .collect();
        let accepted = enqueue_record(&queue, BlobRecord::new(blobs), self.timeout(ws))?;
        if !accepted {
            debug!(queue = %self.queue, "EnqueueBlobs: queue closed");
        }
        ws.feed_status(&self.status, accepted);
        Ok(())
    }
}

/// Inputs: `[queue]`. Outputs: `[t_1 .. t_n, status]`.
///
/// On end-of-stream the data outputs are not written and the status is
/// `false`. Fenced records are waited on before their tensors are exposed.
#[derive(Debug, Clone)]
pub struct DequeueBlobsOp {
    queue: String,
    outputs: Vec<String>,
    status: String,
    timeout: Option<Duration>,
}

impl DequeueBlobsOp {
    pub fn from_def(def: &OperatorDef) -> Result<Self, OperatorError> {
        if def.inputs.len() != 1 {
            return Err(def.invalid("expects exactly one input (the queue)"));
        }
        if def.outputs.len() < 2 {
            return Err(def.invalid("expects at least one blob output followed by the status"));
        }
        let (status, outputs) = def.outputs.split_last().ok_or_else(|| def.invalid("no outputs"))?;
        Ok(Self {
            queue: def.inputs[0].clone(),
            outputs: outputs.to_vec(),
            status: status.clone(),
            timeout: def.optional_timeout(ARG_TIMEOUT_SECS)?,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn timeout(&self, ws: &Workspace) -> Option<Duration> {
        self.timeout.or_else(|| ws.config().operator_timeout())
    }
}

impl Operator for DequeueBlobsOp {
    fn run(&self, ws: &Workspace) -> Result<(), OperatorError> {
        let queue = ws.queue(&self.queue)?;
        check_output_arity(&queue, &self.outputs)?;
        let record = dequeue_record(&queue, self.timeout(ws))?;
        if let Some(record) = &record {
            record.wait_ready();
        } else {
            debug!(queue = %self.queue, "DequeueBlobs: end of stream");
        }
        publish_record(ws, record, &self.outputs, &self.status);
        Ok(())
    }
}
