// queue-ops/core/ops/src/metrics.rs

// Metrics for queue traffic and backpressure
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

pub static QUEUE_RECORDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "queue_ops_records_total",
        "Records passed through a blobs queue",
        &["queue", "event"]
    )
    .expect("register queue_ops_records_total")
});

pub static QUEUE_DEPTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "queue_ops_queue_depth",
        "Records currently held by a blobs queue",
        &["queue"]
    )
    .expect("register queue_ops_queue_depth")
});

pub static QUEUE_BLOCKED_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "queue_ops_blocked_seconds",
        "Time callers spent suspended on a blobs queue",
        &["queue", "side"]
    )
    .expect("register queue_ops_blocked_seconds")
});

pub(crate) fn record_event(queue: &str, event: &str) {
    QUEUE_RECORDS_TOTAL.with_label_values(&[queue, event]).inc();
}

pub(crate) fn set_depth(queue: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as f64);
}

pub(crate) fn observe_blocked(queue: &str, side: &str, seconds: f64) {
    QUEUE_BLOCKED_SECONDS
        .with_label_values(&[queue, side])
        .observe(seconds);
}

/// Drop the per-queue depth series once a queue leaves its registry
pub(crate) fn forget_queue(queue: &str) {
    // Absent when the queue never saw traffic
    let _ = QUEUE_DEPTH.remove_label_values(&[queue]);
}
