//! # Work Queue
//!
//! Deduplicating, rate-limited queue of [`ObjectKey`]s.
//!
//! The queue behaves as a set with a delivery order, not a multiset:
//!
//! - a key is *dirty* when it needs processing and *processing* between `get` and `done`
//! - adding a dirty key is a no-op
//! - adding a processing key marks it dirty but does not queue it; `done` queues it again
//!
//! Together these guarantee at most one in-flight reconciliation per key, and a key
//! dirtied during processing is delivered exactly once more.
//!
//! The queue never decides whether to retry. Callers re-add failed keys with
//! [`WorkQueue::add_rate_limited`] and clear retry state with [`WorkQueue::forget`].

mod key;
mod rate_limiter;

pub use key::{KeyError, ObjectKey};
pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialRateLimiter,
    MaxOfRateLimiter, RateLimiter, RateLimiterSettings,
};

use crate::observability::metrics;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct State {
    /// Keys ready for delivery, in order
    queue: VecDeque<ObjectKey>,
    /// Keys needing processing, with the time they were first marked dirty
    dirty: HashMap<ObjectKey, Instant>,
    /// Keys handed out by `get` and not yet `done`, with their start time
    processing: HashMap<ObjectKey, Instant>,
    /// Keys waiting out a delay, with their deadline
    waiting: HashMap<ObjectKey, Instant>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    rate_limiter: Box<dyn RateLimiter>,
    state: Mutex<State>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // No code path panics while holding the lock, so the state stays consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe keyed work queue
///
/// Cloning is cheap and every clone refers to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl WorkQueue {
    /// Create a named queue; the name labels the queue's metrics and logs
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                rate_limiter: Box::new(rate_limiter),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.inner.lock();
        if state.shutting_down {
            trace!(queue = %self.inner.name, key = %key, "queue.add.ignored_shutdown");
            return;
        }
        if state.dirty.contains_key(&key) {
            return;
        }
        metrics::increment_queue_adds(&self.inner.name);
        state.dirty.insert(key.clone(), Instant::now());
        if state.processing.contains_key(&key) {
            // Requeued by `done`
            return;
        }
        state.queue.push_back(key);
        metrics::set_queue_depth(&self.inner.name, state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    ///
    /// If the key is already waiting, the earlier deadline wins. Must be called from
    /// within a tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&key).is_some_and(|at| *at <= ready_at) {
                return;
            }
            state.waiting.insert(key.clone(), ready_at);
        }

        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep_until(ready_at) => queue.add_if_due(key, ready_at),
            }
        });
    }

    fn add_if_due(&self, key: ObjectKey, ready_at: Instant) {
        let due = {
            let mut state = self.inner.lock();
            // A later add_after with an earlier deadline supersedes this one
            if state.waiting.get(&key) == Some(&ready_at) {
                state.waiting.remove(&key);
                true
            } else {
                false
            }
        };
        if due {
            self.add(key);
        }
    }

    /// Re-add `key` after the rate limiter's delay for it, returning that delay
    pub fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = self.inner.rate_limiter.when(&key);
        metrics::increment_queue_retries(&self.inner.name);
        self.add_after(key, delay);
        delay
    }

    /// Clear the retry state of `key`
    pub fn forget(&self, key: &ObjectKey) {
        self.inner.rate_limiter.forget(key);
    }

    /// Failures recorded for `key` since the last `forget`
    #[must_use]
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down and every ready key has been
    /// handed out. The caller must pass the key to [`WorkQueue::done`] when finished.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so an add between the check and the
            // await still wakes us
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if let Some(key) = state.queue.pop_front() {
                    let now = Instant::now();
                    if let Some(dirty_since) = state.dirty.remove(&key) {
                        metrics::observe_queue_latency(
                            &self.inner.name,
                            now.saturating_duration_since(dirty_since).as_secs_f64(),
                        );
                    }
                    state.processing.insert(key.clone(), now);
                    metrics::set_queue_depth(&self.inner.name, state.queue.len());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release the processing mark on `key`
    ///
    /// If the key was added again while being processed it becomes deliverable now.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.inner.lock();
        let Some(started) = state.processing.remove(key) else {
            debug!(queue = %self.inner.name, key = %key, "queue.done.not_processing");
            return;
        };
        metrics::observe_work_duration(&self.inner.name, started.elapsed().as_secs_f64());
        if state.dirty.contains_key(key) {
            state.queue.push_back(key.clone());
            metrics::set_queue_depth(&self.inner.name, state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every blocked `get`
    ///
    /// Keys already ready are still handed out; keys waiting out a delay are dropped.
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
        }
        debug!(queue = %self.inner.name, "queue.shutdown");
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Number of keys ready for delivery
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently between `get` and `done`
    #[must_use]
    pub fn processing(&self) -> HashSet<ObjectKey> {
        self.inner.lock().processing.keys().cloned().collect()
    }
}
