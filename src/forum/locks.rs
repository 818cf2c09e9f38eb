//! Per-topic serialization of writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

type Registry = StdMutex<HashMap<i64, Weak<Mutex<()>>>>;

/// Keyed async mutexes, one per topic being written.
///
/// Writers of the same topic queue here before opening their transaction, so
/// position assignment never races inside this process. The SQLite write lock
/// taken at the start of each transaction covers other processes.
///
/// The registry only holds weak handles. A topic's entry goes away when its
/// last guard is dropped and nobody is waiting on it.
#[derive(Debug, Default)]
pub struct TopicLocks {
    registry: Arc<Registry>,
}

impl TopicLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a topic. Released when the guard drops.
    pub async fn acquire(&self, topic_id: i64) -> TopicGuard {
        let lock = self.get_or_create(topic_id);
        TopicGuard {
            topic_id,
            guard: Some(lock.lock_owned().await),
            registry: Arc::clone(&self.registry),
        }
    }

    fn get_or_create(&self, topic_id: i64) -> Arc<Mutex<()>> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = registry.get(&topic_id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(Mutex::new(()));
        registry.insert(topic_id, Arc::downgrade(&lock));
        lock
    }

    /// Number of topics currently held or waited on.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one topic.
#[derive(Debug)]
pub struct TopicGuard {
    topic_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<Registry>,
}

impl TopicGuard {
    #[must_use]
    pub fn topic_id(&self) -> i64 {
        self.topic_id
    }
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        // Waiters keep the mutex alive; only a dead handle is removed.
        drop(self.guard.take());
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .get(&self.topic_id)
            .is_some_and(|lock| lock.strong_count() == 0)
        {
            registry.remove(&self.topic_id);
        }
    }
}
