// queue-ops/core/ops/src/queue.rs

// Blocking bounded queue of blob records
use crate::metrics;
use crate::record::BlobRecord;
use crate::types::{QueueError, QueueStats};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of a timed enqueue
#[derive(Debug)]
pub enum EnqueueOutcome {
    Accepted,
    /// The queue is closed; the record is handed back untouched
    Closed(BlobRecord),
    /// The queue stayed full until the deadline; the record is handed back
    TimedOut(BlobRecord),
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }
}

/// Result of a timed dequeue
#[derive(Debug)]
pub enum DequeueOutcome {
    Record(BlobRecord),
    /// Closed and drained. Permanent.
    EndOfStream,
    TimedOut,
}

impl DequeueOutcome {
    pub fn into_record(self) -> Option<BlobRecord> {
        match self {
            DequeueOutcome::Record(record) => Some(record),
            _ => None,
        }
    }
}

struct QueueState {
    records: VecDeque<BlobRecord>,
    closed: bool,
    waiting_producers: usize,
    waiting_consumers: usize,
}

/// Bounded multi-producer/multi-consumer FIFO of [`BlobRecord`]s.
///
/// Producers block while the queue is full and open; consumers block while it
/// is empty and open. [`BlobsQueue::close`] is a one-way transition: it
/// rejects further enqueues, wakes every waiter, and leaves already accepted
/// records available until drained.
pub struct BlobsQueue {
    name: String,
    capacity: usize,
    record_arity: usize,
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
}

impl BlobsQueue {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        record_arity: usize,
    ) -> Result<Self, QueueError> {
        let name = name.into();
        Self::validate(&name, capacity, record_arity)?;

        debug!(queue = %name, capacity, record_arity, "Created blobs queue");

        Ok(Self {
            name,
            capacity,
            record_arity,
            state: Mutex::new(QueueState {
                records: VecDeque::with_capacity(capacity),
                closed: false,
                waiting_producers: 0,
                waiting_consumers: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Check creation parameters without building a queue
    pub fn validate(name: &str, capacity: usize, record_arity: usize) -> Result<(), QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidArgument(format!(
                "queue '{}' capacity must be positive",
                name
            )));
        }
        if record_arity == 0 {
            return Err(QueueError::InvalidArgument(format!(
                "queue '{}' record arity must be positive",
                name
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_arity(&self) -> usize {
        self.record_arity
    }

    /// Current occupancy. Advisory only: may be stale as soon as it returns.
    pub fn size(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Push a record, blocking while the queue is full.
    ///
    /// Returns `Ok(false)` if the queue is (or becomes) closed before the
    /// record is accepted.
    pub fn enqueue(&self, record: BlobRecord) -> Result<bool, QueueError> {
        Ok(self.push(record, None)?.is_accepted())
    }

    /// Like [`BlobsQueue::enqueue`] but gives up after `timeout`
    pub fn enqueue_timeout(
        &self,
        record: BlobRecord,
        timeout: Duration,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.push(record, deadline_after(timeout))
    }

    /// Pop the head record, blocking while the queue is empty and open.
    ///
    /// `None` means end-of-stream: the queue is closed and drained. Every
    /// later call returns `None` as well.
    pub fn dequeue(&self) -> Option<BlobRecord> {
        infallible(self.pop(None, accept_any)).into_record()
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> DequeueOutcome {
        infallible(self.pop(deadline_after(timeout), accept_any))
    }

    /// Pop the head record only if `check` accepts it.
    ///
    /// A rejected head stays at the front of the queue and the check's error
    /// is returned. `check` runs under the queue lock. A `timeout` of `None`
    /// blocks without limit.
    pub fn dequeue_checked<E>(
        &self,
        timeout: Option<Duration>,
        check: impl Fn(&BlobRecord) -> Result<(), E>,
    ) -> Result<DequeueOutcome, E> {
        self.pop(timeout.and_then(deadline_after), check)
    }

    /// Close the queue and wake every blocked producer and consumer.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let pending = state.records.len();
        let producers = state.waiting_producers;
        let consumers = state.waiting_consumers;
        self.not_full.notify_all();
        self.not_empty.notify_all();
        drop(state);

        metrics::set_depth(&self.name, pending);
        info!(
            queue = %self.name,
            pending,
            producers,
            consumers,
            "Blobs queue closed"
        );
        true
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            name: self.name.clone(),
            capacity: self.capacity,
            record_arity: self.record_arity,
            size: state.records.len(),
            closed: state.closed,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            waiting_producers: state.waiting_producers,
            waiting_consumers: state.waiting_consumers,
        }
    }

    fn check_arity(&self, record: &BlobRecord) -> Result<(), QueueError> {
        if record.len() != self.record_arity {
            return Err(QueueError::ArityMismatch {
                expected: self.record_arity,
                actual: record.len(),
            });
        }
        Ok(())
    }

    fn push(
        &self,
        record: BlobRecord,
        deadline: Option<Instant>,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.check_arity(&record)?;

        let mut blocked_since: Option<Instant> = None;
        let mut state = self.state.lock();
        let outcome = loop {
            // Closed wins over free space
            if state.closed {
                break EnqueueOutcome::Closed(record);
            }
            if state.records.len() < self.capacity {
                state.records.push_back(record);
                if state.waiting_consumers > 0 {
                    self.not_empty.notify_one();
                }
                break EnqueueOutcome::Accepted;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break EnqueueOutcome::TimedOut(record);
                }
            }

            blocked_since.get_or_insert_with(Instant::now);
            state.waiting_producers += 1;
            match deadline {
                Some(deadline) => {
                    self.not_full.wait_until(&mut state, deadline);
                }
                None => self.not_full.wait(&mut state),
            }
            state.waiting_producers -= 1;
        };
        let depth = state.records.len();
        drop(state);

        if let Some(since) = blocked_since {
            metrics::observe_blocked(&self.name, "enqueue", since.elapsed().as_secs_f64());
        }
        match &outcome {
            EnqueueOutcome::Accepted => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::record_event(&self.name, "enqueued");
                metrics::set_depth(&self.name, depth);
            }
            EnqueueOutcome::Closed(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_event(&self.name, "rejected");
                debug!(queue = %self.name, "Enqueue rejected, queue closed");
            }
            EnqueueOutcome::TimedOut(_) => {
                debug!(queue = %self.name, "Enqueue timed out");
            }
        }
        Ok(outcome)
    }

    fn pop<E>(
        &self,
        deadline: Option<Instant>,
        check: impl Fn(&BlobRecord) -> Result<(), E>,
    ) -> Result<DequeueOutcome, E> {
        let mut blocked_since: Option<Instant> = None;
        let mut state = self.state.lock();
        let outcome = loop {
            if let Some(head) = state.records.front() {
                if let Err(e) = check(head) {
                    break Err(e);
                }
            }
            // Drain before reporting end-of-stream
            if let Some(record) = state.records.pop_front() {
                if state.waiting_producers > 0 {
                    self.not_full.notify_one();
                }
                break Ok(DequeueOutcome::Record(record));
            }
            if state.closed {
                break Ok(DequeueOutcome::EndOfStream);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break Ok(DequeueOutcome::TimedOut);
                }
            }

            blocked_since.get_or_insert_with(Instant::now);
            state.waiting_consumers += 1;
            match deadline {
                Some(deadline) => {
                    self.not_empty.wait_until(&mut state, deadline);
                }
                None => self.not_empty.wait(&mut state),
            }
            state.waiting_consumers -= 1;
        };
        let depth = state.records.len();
        drop(state);

        if let Some(since) = blocked_since {
            metrics::observe_blocked(&self.name, "dequeue", since.elapsed().as_secs_f64());
        }
        if let Ok(DequeueOutcome::Record(_)) = &outcome {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
            metrics::record_event(&self.name, "dequeued");
            metrics::set_depth(&self.name, depth);
        }
        outcome
    }
}

/// `None` when the deadline is past what `Instant` can represent, which
/// callers treat as no deadline at all
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn accept_any(_: &BlobRecord) -> Result<(), Infallible> {
    Ok(())
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

impl std::fmt::Debug for BlobsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobsQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("record_arity", &self.record_arity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn rec(value: f32) -> BlobRecord {
        BlobRecord::new(vec![Tensor::scalar(value)])
    }

    fn value(record: &BlobRecord) -> f32 {
        record.blobs()[0].to_vec()[0]
    }

    fn wait_for(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_create_rejects_zero_capacity_and_arity() {
        assert!(matches!(
            BlobsQueue::new("q", 0, 1),
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(matches!(
            BlobsQueue::new("q", 1, 0),
            Err(QueueError::InvalidArgument(_))
        ));
        let queue = BlobsQueue::new("q", 3, 2).unwrap();
        assert_eq!(queue.capacity(), 3);
        assert_eq!(queue.record_arity(), 2);
        assert_eq!(queue.size(), 0);
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let queue = Arc::new(BlobsQueue::new("e2e", 2, 1).unwrap());

        assert!(queue.enqueue(rec(1.0)).unwrap());
        assert_eq!(queue.size(), 1);
        assert!(queue.enqueue(rec(2.0)).unwrap());
        assert_eq!(queue.size(), 2);

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                let accepted = queue.enqueue(rec(3.0)).unwrap();
                done.store(true, Ordering::SeqCst);
                accepted
            })
        };

        wait_for("producer to block", || queue.stats().waiting_producers == 1);
        assert!(!done.load(Ordering::SeqCst));

        let a = queue.dequeue().unwrap();
        assert_eq!(value(&a), 1.0);
        assert!(producer.join().unwrap());
        assert_eq!(queue.size(), 2);

        assert_eq!(value(&queue.dequeue().unwrap()), 2.0);
        assert_eq!(value(&queue.dequeue().unwrap()), 3.0);

        assert!(queue.close());
        for _ in 0..3 {
            assert!(queue.dequeue().is_none());
        }
    }

    #[test]
    fn test_close_drains_then_reports_end_of_stream() {
        let queue = BlobsQueue::new("drain", 4, 1).unwrap();
        for i in 0..3 {
            assert!(queue.enqueue(rec(i as f32)).unwrap());
        }
        queue.close();

        for i in 0..3 {
            assert_eq!(value(&queue.dequeue().unwrap()), i as f32);
        }
        assert!(queue.dequeue().is_none());
        assert!(matches!(
            queue.dequeue_timeout(Duration::from_millis(5)),
            DequeueOutcome::EndOfStream
        ));
    }

    #[test]
    fn test_close_rejects_enqueue() {
        let queue = BlobsQueue::new("reject", 2, 1).unwrap();
        assert!(queue.enqueue(rec(1.0)).unwrap());
        queue.close();

        assert!(!queue.enqueue(rec(2.0)).unwrap());
        assert_eq!(queue.size(), 1);
        assert!(matches!(
            queue.enqueue_timeout(rec(3.0), Duration::from_millis(5)).unwrap(),
            EnqueueOutcome::Closed(_)
        ));

        let stats = queue.stats();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.enqueued, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = Arc::new(BlobsQueue::new("double", 1, 1).unwrap());
        let closers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.close())
            })
            .collect();
        let transitions = closers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|closed| *closed)
            .count();
        assert_eq!(transitions, 1);
        assert!(queue.is_closed());
        assert!(!queue.close());
    }

    #[test]
    fn test_arity_mismatch_leaves_queue_unchanged() {
        let queue = BlobsQueue::new("arity", 2, 2).unwrap();
        let err = queue.enqueue(rec(1.0)).unwrap_err();
        assert_eq!(
            err,
            QueueError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(queue.size(), 0);

        // Still checked after close
        queue.close();
        assert!(matches!(
            queue.enqueue(rec(1.0)),
            Err(QueueError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_no_lost_wakeup_on_capacity_one() {
        let queue = Arc::new(BlobsQueue::new("wakeup", 1, 1).unwrap());
        assert!(queue.enqueue(rec(1.0)).unwrap());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(rec(2.0)).unwrap())
        };
        wait_for("producer to block", || queue.stats().waiting_producers == 1);

        assert_eq!(value(&queue.dequeue().unwrap()), 1.0);
        assert!(producer.join().unwrap());
        assert_eq!(value(&queue.dequeue().unwrap()), 2.0);
    }

    #[test]
    fn test_close_wakes_blocked_producers_and_consumers() {
        let full = Arc::new(BlobsQueue::new("full", 1, 1).unwrap());
        assert!(full.enqueue(rec(0.0)).unwrap());
        let producers: Vec<_> = (0..3)
            .map(|i| {
                let queue = full.clone();
                thread::spawn(move || queue.enqueue(rec(i as f32)).unwrap())
            })
            .collect();
        wait_for("producers to block", || full.stats().waiting_producers == 3);
        full.close();
        for p in producers {
            assert!(!p.join().unwrap());
        }
        assert_eq!(full.size(), 1);

        let empty = Arc::new(BlobsQueue::new("empty", 1, 1).unwrap());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = empty.clone();
                thread::spawn(move || queue.dequeue().is_none())
            })
            .collect();
        wait_for("consumers to block", || empty.stats().waiting_consumers == 3);
        empty.close();
        for c in consumers {
            assert!(c.join().unwrap());
        }
    }

    #[test]
    fn test_timed_operations_do_not_consume_state() {
        let queue = BlobsQueue::new("timed", 1, 1).unwrap();
        assert!(matches!(
            queue.dequeue_timeout(Duration::from_millis(10)),
            DequeueOutcome::TimedOut
        ));

        assert!(queue
            .enqueue_timeout(rec(1.0), Duration::ZERO)
            .unwrap()
            .is_accepted());
        match queue.enqueue_timeout(rec(2.0), Duration::from_millis(10)).unwrap() {
            EnqueueOutcome::TimedOut(record) => assert_eq!(value(&record), 2.0),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(queue.size(), 1);

        let head = queue.dequeue_timeout(Duration::ZERO).into_record().unwrap();
        assert_eq!(value(&head), 1.0);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let queue = Arc::new(BlobsQueue::new("far", 1, 1).unwrap());
        assert!(queue
            .enqueue_timeout(rec(1.0), Duration::MAX)
            .unwrap()
            .is_accepted());
        assert_eq!(
            value(&queue.dequeue_timeout(Duration::MAX).into_record().unwrap()),
            1.0
        );

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(u64::MAX)))
        };
        wait_for("consumer to block", || queue.stats().waiting_consumers == 1);
        assert!(queue.enqueue(rec(2.0)).unwrap());
        match consumer.join().unwrap() {
            DequeueOutcome::Record(record) => assert_eq!(value(&record), 2.0),
            other => panic!("expected a record, got {:?}", other),
        }
    }

    #[test]
    fn test_checked_dequeue_keeps_rejected_head() {
        let queue = BlobsQueue::new("checked", 2, 1).unwrap();
        assert!(queue.enqueue(rec(1.0)).unwrap());
        assert!(queue.enqueue(rec(2.0)).unwrap());

        let rejected = queue.dequeue_checked(None, |r| {
            if value(r) == 1.0 {
                Err("head refused")
            } else {
                Ok(())
            }
        });
        assert_eq!(rejected.unwrap_err(), "head refused");
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.stats().dequeued, 0);

        let accepted = queue
            .dequeue_checked(Some(Duration::ZERO), |_| Ok::<(), &str>(()))
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(value(&accepted), 1.0);
    }

    #[test]
    fn test_fifo_per_producer_with_many_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 200;

        let queue = Arc::new(BlobsQueue::new("fifo", 3, 2).unwrap());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let record = BlobRecord::new(vec![
                            Tensor::scalar(p as f32),
                            Tensor::scalar(seq as f32),
                        ]);
                        assert!(queue.enqueue(record).unwrap());
                    }
                })
            })
            .collect();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut last = vec![-1.0f32; PRODUCERS];
                let mut seen = 0;
                while let Some(record) = queue.dequeue() {
                    assert!(queue.size() <= queue.capacity());
                    let p = record.blobs()[0].to_vec()[0] as usize;
                    let seq = record.blobs()[1].to_vec()[0];
                    assert!(seq > last[p], "producer {} reordered", p);
                    last[p] = seq;
                    seen += 1;
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        queue.close();
        assert_eq!(consumer.join().unwrap(), PRODUCERS * PER_PRODUCER);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, (PRODUCERS * PER_PRODUCER) as u64);
        assert_eq!(stats.dequeued, stats.enqueued);
    }
}
