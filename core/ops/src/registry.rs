// queue-ops/core/ops/src/registry.rs

// Name -> queue table owned by a workspace
use crate::metrics;
use crate::queue::BlobsQueue;
use crate::types::QueueError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Table of named queues shared by every operator in a workspace.
///
/// Entries are reference counted: removing a name only detaches it, and the
/// queue lives on for as long as any operator still holds its handle.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: RwLock<HashMap<String, Arc<BlobsQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue registered under `name`, creating it on first use.
    ///
    /// Fails with `QueueConfigConflict` if the name is already bound to a
    /// queue with a different capacity or arity.
    pub fn get_or_create(
        &self,
        name: &str,
        capacity: usize,
        record_arity: usize,
    ) -> Result<Arc<BlobsQueue>, QueueError> {
        BlobsQueue::validate(name, capacity, record_arity)?;
        if let Some(existing) = self.queues.read().get(name) {
            return Self::check_config(name, existing, capacity, record_arity);
        }

        let mut queues = self.queues.write();
        // Lost the race to another creator
        if let Some(existing) = queues.get(name) {
            return Self::check_config(name, existing, capacity, record_arity);
        }

        let queue = Arc::new(BlobsQueue::new(name, capacity, record_arity)?);
        queues.insert(name.to_string(), queue.clone());
        info!(
            queue = name,
            capacity, record_arity, "Registered blobs queue"
        );
        Ok(queue)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BlobsQueue>> {
        self.queues.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    /// Detach `name`. Handles already held stay valid.
    pub fn remove(&self, name: &str) -> Option<Arc<BlobsQueue>> {
        let removed = self.queues.write().remove(name);
        if removed.is_some() {
            metrics::forget_queue(name);
            debug!(queue = name, "Removed blobs queue from registry");
        }
        removed
    }

    /// Drop every entry, optionally closing each queue first so blocked
    /// producers and consumers are released.
    pub fn clear(&self, close: bool) {
        let drained: Vec<(String, Arc<BlobsQueue>)> = self.queues.write().drain().collect();
        for (name, queue) in &drained {
            if close {
                queue.close();
            }
            metrics::forget_queue(name);
        }
        if !drained.is_empty() {
            info!(count = drained.len(), close, "Tore down queue registry");
        }
    }

    fn check_config(
        name: &str,
        existing: &Arc<BlobsQueue>,
        capacity: usize,
        record_arity: usize,
    ) -> Result<Arc<BlobsQueue>, QueueError> {
        if existing.capacity() != capacity || existing.record_arity() != record_arity {
            return Err(QueueError::QueueConfigConflict {
                name: name.to_string(),
                existing_capacity: existing.capacity(),
                existing_arity: existing.record_arity(),
                requested_capacity: capacity,
                requested_arity: record_arity,
            });
        }
        Ok(existing.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BlobRecord;
    use crate::tensor::Tensor;
    use std::thread;

    #[test]
    fn test_get_or_create_shares_instance() {
        let registry = QueueRegistry::new();
        let a = registry.get_or_create("batches", 4, 2).unwrap();
        let b = registry.get_or_create("batches", 4, 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["batches".to_string()]);
    }

    #[test]
    fn test_config_conflict() {
        let registry = QueueRegistry::new();
        registry.get_or_create("batches", 4, 2).unwrap();

        let err = registry.get_or_create("batches", 8, 2).unwrap_err();
        assert!(matches!(
            err,
            QueueError::QueueConfigConflict {
                existing_capacity: 4,
                requested_capacity: 8,
                ..
            }
        ));
        assert!(matches!(
            registry.get_or_create("batches", 4, 3),
            Err(QueueError::QueueConfigConflict { .. })
        ));
    }

    #[test]
    fn test_invalid_arguments_do_not_register() {
        let registry = QueueRegistry::new();
        assert!(matches!(
            registry.get_or_create("bad", 0, 1),
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(!registry.contains("bad"));

        // Bad parameters are reported as such even when the name is taken
        registry.get_or_create("q", 2, 1).unwrap();
        assert!(matches!(
            registry.get_or_create("q", 0, 1),
            Err(QueueError::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.get_or_create("q", 2, 0),
            Err(QueueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_removed_queue_stays_valid_for_holders() {
        let registry = QueueRegistry::new();
        let held = registry.get_or_create("q", 2, 1).unwrap();
        let removed = registry.remove("q").unwrap();
        assert!(Arc::ptr_eq(&held, &removed));
        assert!(registry.get("q").is_none());
        assert!(registry.remove("q").is_none());

        assert!(held
            .enqueue(BlobRecord::new(vec![Tensor::scalar(1.0)]))
            .unwrap());
        assert_eq!(held.size(), 1);

        // A fresh queue can now take the name with other parameters
        let fresh = registry.get_or_create("q", 5, 3).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[test]
    fn test_clear_closes_queues() {
        let registry = QueueRegistry::new();
        let q1 = registry.get_or_create("a", 1, 1).unwrap();
        let q2 = registry.get_or_create("b", 1, 1).unwrap();
        registry.clear(true);
        assert!(registry.is_empty());
        assert!(q1.is_closed());
        assert!(q2.is_closed());

        let q3 = registry.get_or_create("c", 1, 1).unwrap();
        registry.clear(false);
        assert!(!q3.is_closed());
    }

    #[test]
    fn test_concurrent_creators_get_one_queue() {
        let registry = Arc::new(QueueRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create("shared", 16, 1).unwrap())
            })
            .collect();
        let queues: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(queues.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
