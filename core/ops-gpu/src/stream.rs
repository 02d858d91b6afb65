// queue-ops/core/ops-gpu/src/stream.rs

// In-order device execution streams and their completion events
use crate::types::GpuError;
use parking_lot::{Condvar, Mutex};
use queue_ops::{CompletionFence, Device, Fence};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Count of jobs the stream has finished
#[derive(Debug, Default)]
struct Progress {
    completed: Mutex<u64>,
    cv: Condvar,
}

impl Progress {
    fn advance(&self) {
        *self.completed.lock() += 1;
        self.cv.notify_all();
    }

    fn reached(&self, target: u64) -> bool {
        *self.completed.lock() >= target
    }

    fn wait_for(&self, target: u64) {
        let mut completed = self.completed.lock();
        while *completed < target {
            self.cv.wait(&mut completed);
        }
    }
}

/// Marker recorded on a stream: completes once every job launched on the
/// stream before it has finished.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    device: Device,
    target: u64,
    progress: Arc<Progress>,
}

impl StreamEvent {
    pub fn device(&self) -> Device {
        self.device
    }
}

impl CompletionFence for StreamEvent {
    fn is_complete(&self) -> bool {
        self.progress.reached(self.target)
    }

    fn wait(&self) {
        self.progress.wait_for(self.target);
    }
}

struct Submitter {
    sender: Option<Sender<Job>>,
    submitted: u64,
}

/// Simulated asynchronous device stream.
///
/// Jobs run one at a time, in launch order, on a worker owned by the stream.
/// `launch` returns as soon as the job is queued.
pub struct DeviceStream {
    device: Device,
    submitter: Mutex<Submitter>,
    progress: Arc<Progress>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceStream {
    pub fn new(device: Device, label: &str) -> Result<Self, GpuError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let progress = Arc::new(Progress::default());
        let worker = {
            let progress = progress.clone();
            thread::Builder::new()
                .name(format!("{}-{}", device, label))
                .spawn(move || run_worker(device, receiver, progress))?
        };
        debug!(%device, stream = label, "Started device stream");

        Ok(Self {
            device,
            submitter: Mutex::new(Submitter {
                sender: Some(sender),
                submitted: 0,
            }),
            progress,
            worker: Some(worker),
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Queue `job` behind all previously launched work
    pub fn launch(&self, job: impl FnOnce() + Send + 'static) -> Result<(), GpuError> {
        let mut submitter = self.submitter.lock();
        let sender = submitter
            .sender
            .as_ref()
            .ok_or(GpuError::StreamClosed(self.device))?;
        sender
            .send(Box::new(job))
            .map_err(|_| GpuError::StreamClosed(self.device))?;
        submitter.submitted += 1;
        Ok(())
    }

    /// Event covering everything launched so far
    pub fn record_event(&self) -> StreamEvent {
        let submitter = self.submitter.lock();
        StreamEvent {
            device: self.device,
            target: submitter.submitted,
            progress: self.progress.clone(),
        }
    }

    /// Order all later work on this stream after `fence` without blocking
    /// the host.
    pub fn wait_fence(&self, fence: Fence) -> Result<(), GpuError> {
        self.launch(move || fence.wait())
    }

    /// Block the host until everything launched so far has run
    pub fn synchronize(&self) {
        self.record_event().wait();
    }

    /// True when every launched job has finished
    pub fn is_idle(&self) -> bool {
        self.record_event().is_complete()
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit
        self.submitter.get_mut().sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(device = %self.device, "Device stream worker exited abnormally");
            }
        }
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("device", &self.device)
            .field("submitted", &self.submitter.lock().submitted)
            .field("completed", &*self.progress.completed.lock())
            .finish()
    }
}

fn run_worker(device: Device, jobs: Receiver<Job>, progress: Arc<Progress>) {
    for job in jobs {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(%device, "Device job panicked");
        }
        progress.advance();
    }
    debug!(%device, "Device stream drained");
}
