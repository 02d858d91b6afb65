// queue-ops/core/ops/src/record.rs

// Records held by a blobs queue
use crate::tensor::Tensor;
use std::fmt;
use std::sync::Arc;

/// Completion token for asynchronous work that produced a record's tensors.
///
/// A consumer must not read the tensors of a fenced record until the fence
/// reports completion, either by blocking on [`CompletionFence::wait`] or by
/// ordering its own device work after the fence.
pub trait CompletionFence: Send + Sync + fmt::Debug {
    fn is_complete(&self) -> bool;

    /// Block the calling thread until the fence completes
    fn wait(&self);
}

pub type Fence = Arc<dyn CompletionFence>;

/// One queued unit: an ordered, fixed-size group of tensors.
///
/// Records are moved into and out of a queue and are deliberately not
/// `Clone`, so two consumers can never observe the same record.
#[derive(Debug)]
pub struct BlobRecord {
    blobs: Vec<Tensor>,
    fence: Option<Fence>,
}

impl BlobRecord {
    pub fn new(blobs: Vec<Tensor>) -> Self {
        Self { blobs, fence: None }
    }

    pub fn with_fence(mut self, fence: Fence) -> Self {
        self.fence = Some(fence);
        self
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn blobs(&self) -> &[Tensor] {
        &self.blobs
    }

    pub fn fence(&self) -> Option<&Fence> {
        self.fence.as_ref()
    }

    /// True when there is no fence or the fence has completed
    pub fn is_ready(&self) -> bool {
        self.fence.as_ref().map_or(true, |f| f.is_complete())
    }

    /// Block until the producing work has completed
    pub fn wait_ready(&self) {
        if let Some(fence) = &self.fence {
            fence.wait();
        }
    }

    pub fn into_parts(self) -> (Vec<Tensor>, Option<Fence>) {
        (self.blobs, self.fence)
    }

    pub fn into_blobs(self) -> Vec<Tensor> {
        self.blobs
    }
}

impl From<Vec<Tensor>> for BlobRecord {
    fn from(blobs: Vec<Tensor>) -> Self {
        Self::new(blobs)
    }
}
