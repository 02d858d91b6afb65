// queue-ops/core/ops/src/types.rs

// Error taxonomy and diagnostic types shared by the queue and operator layers
use crate::tensor::Device;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the queue and its registry.
///
/// A closed queue is not an error: enqueue reports it as `false` and dequeue
/// as end-of-stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record arity mismatch: expected {expected} blobs, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error(
        "Queue '{name}' already exists with capacity {existing_capacity} and arity {existing_arity}, \
         requested capacity {requested_capacity} and arity {requested_arity}"
    )]
    QueueConfigConflict {
        name: String,
        existing_capacity: usize,
        existing_arity: usize,
        requested_capacity: usize,
        requested_arity: usize,
    },
}

/// Errors raised while building or running an operator
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob '{name}' holds {actual}, expected {expected}")]
    BlobKindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("No operator '{op_type}' registered for {device_type:?}")]
    UnknownOperator {
        op_type: String,
        device_type: crate::operator::DeviceType,
    },

    #[error("Missing argument '{0}'")]
    MissingArgument(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Invalid operator definition for {op_type}: {reason}")]
    InvalidDefinition { op_type: String, reason: String },

    #[error("Blob '{blob}' lives on {actual}, operator runs on {expected}")]
    DeviceMismatch {
        blob: String,
        expected: Device,
        actual: Device,
    },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Timed out waiting on queue '{0}'")]
    TimedOut(String),

    #[error("Net not found: {0}")]
    NetNotFound(String),

    #[error("Net '{0}' already exists")]
    NetExists(String),
}

/// Point-in-time view of a queue, for diagnostics only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub capacity: usize,
    pub record_arity: usize,
    pub size: usize,
    pub closed: bool,
    pub enqueued: u64,
    pub dequeued: u64,
    pub rejected: u64,
    pub waiting_producers: usize,
    pub waiting_consumers: usize,
}
