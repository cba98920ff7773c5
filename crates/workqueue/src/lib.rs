//! A rate-limited, deduplicating work queue keyed by an opaque, hashable key
//! (typically `namespace/name`).
//!
//! The queue and the set of in-flight keys form disjoint sets: `add` is a
//! no-op for a key already queued or already being processed. This gives
//! per-key serialization — at most one in-flight reconcile per key — without
//! a mutex map, matching the level-triggered design the controllers rely on.

pub mod backoff;

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use backoff::ExponentialBackoff;

struct Inner<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    /// Set by `add_rate_limited` on a key currently in-flight; consumed by
    /// the matching `done` to requeue it after its backoff delay.
    pending_requeue: HashMap<K, Duration>,
    /// Consecutive-failure counters driving each key's backoff delay.
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> Inner<K> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            pending_requeue: HashMap::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }

    fn in_queue_or_flight(&self, key: &K) -> bool {
        self.queued.contains(key) || self.processing.contains(key)
    }

    fn push(&mut self, key: K) {
        self.queued.insert(key.clone());
        self.queue.push_back(key);
    }
}

/// A FIFO of keys with deduplication and exponential-backoff retry.
///
/// Clone is cheap: it shares the underlying queue, so worker tasks and the
/// event handler can each hold their own handle.
#[derive(Clone)]
pub struct WorkQueue<K> {
    inner: Arc<Mutex<Inner<K>>>,
    notify: Arc<Notify>,
    backoff: ExponentialBackoff,
}

impl<K> std::fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone + Send + 'static> WorkQueue<K> {
    /// Creates an empty queue with the given backoff parameters.
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            notify: Arc::new(Notify::new()),
            backoff,
        }
    }

    /// Enqueues `key`. A no-op if `key` is already queued or in-flight.
    pub async fn add(&self, key: K) {
        let mut inner = self.inner.lock().await;
        if inner.shutting_down || inner.in_queue_or_flight(&key) {
            return;
        }
        inner.push(key);
        self.notify.notify_one();
    }

    /// Enqueues `key` after its next backoff delay, incrementing its failure
    /// counter. If `key` is currently in-flight, the requeue happens when
    /// the worker calls [`WorkQueue::done`]; otherwise a delayed task is
    /// spawned directly.
    pub async fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut inner = self.inner.lock().await;
            let count = inner.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay_for(*count);
            *count += 1;

            if inner.processing.contains(&key) {
                inner.pending_requeue.insert(key.clone(), delay);
                return;
            }
            delay
        };
        self.schedule_delayed_add(key, delay);
    }

    fn schedule_delayed_add(&self, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Blocks until a key is available, marks it in-flight, and returns it.
    /// Returns `None` once the queue has been shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.queue.pop_front() {
                    inner.queued.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `key` as finished. If [`WorkQueue::add_rate_limited`] was
    /// called on `key` while it was in-flight, requeues it now after the
    /// recorded backoff delay.
    pub async fn done(&self, key: &K) {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.processing.remove(key);
            inner.pending_requeue.remove(key)
        };
        if let Some(delay) = pending {
            debug!("requeueing key with backoff after in-flight failure");
            self.schedule_delayed_add(key.clone(), delay);
        }
    }

    /// Clears the failure counter for `key`, resetting its backoff to the
    /// base delay. Callers invoke this after a successful reconcile.
    pub async fn forget(&self, key: &K) {
        self.inner.lock().await.failures.remove(key);
    }

    /// Signals shutdown: no further `add` calls are accepted, and blocked
    /// `get` calls wake up and drain remaining queued keys before returning
    /// `None`.
    pub async fn shut_down(&self) {
        self.inner.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys currently queued (not counting in-flight keys).
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// True if no key is queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(ExponentialBackoff::new(
            Duration::from_millis(5),
            Duration::from_millis(50),
        ))
    }

    #[tokio::test]
    async fn add_then_get_returns_key() {
        let q = queue();
        q.add("ns/a".to_string()).await;
        assert_eq!(q.get().await, Some("ns/a".to_string()));
    }

    #[tokio::test]
    async fn add_dedups_queued_key() {
        let q = queue();
        q.add("ns/a".to_string()).await;
        q.add("ns/a".to_string()).await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn add_is_noop_while_in_flight() {
        let q = queue();
        q.add("ns/a".to_string()).await;
        let key = q.get().await.expect("key was just added");
        // Queued set is now empty; `a` is in-flight. A fresh Add must be a
        // no-op per the disjoint-sets invariant.
        q.add(key.clone()).await;
        assert_eq!(q.len().await, 0);
        q.done(&key).await;
        assert_eq!(q.len().await, 0);
    }

    #[tokio::test]
    async fn add_rate_limited_requeues_after_done() {
        let q = queue();
        q.add("ns/a".to_string()).await;
        let key = q.get().await.expect("key was just added");
        q.add_rate_limited(key.clone()).await;
        q.done(&key).await;

        // Requeue is delayed; allow the spawned task to fire.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(q.get().await, Some(key));
    }

    #[tokio::test]
    async fn forget_resets_backoff() {
        let q = queue();
        q.add_rate_limited("ns/a".to_string()).await;
        q.forget(&"ns/a".to_string()).await;
        // No direct observable here beyond not panicking; failure counter
        // reset is exercised indirectly via backoff::tests.
    }

    #[tokio::test]
    async fn shutdown_drains_then_returns_none() {
        let q = queue();
        q.add("ns/a".to_string()).await;
        q.shut_down().await;
        assert_eq!(q.get().await, Some("ns/a".to_string()));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_with_empty_queue_returns_none_immediately() {
        let q = queue();
        q.shut_down().await;
        assert_eq!(q.get().await, None);
    }
}
