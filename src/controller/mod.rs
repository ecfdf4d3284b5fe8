//! # Controller
//!
//! The reconciliation engine: a deduplicating work queue fed by event handlers and
//! drained by a pool of workers, started behind a cache-sync gate.
//!
//! - `queue`: keyed work queue and rate limiters
//! - `cache`: cache traits and the sync gate
//! - `handlers`: event handlers translating watch notifications into keys
//! - `dispatch`: key → cached object → sync handler
//! - `worker`: per-worker processing loop
//!
//! ```text
//! watch events -> handlers -> WorkQueue -> workers -> dispatch -> SyncHandler
//!                                ^                                  |
//!                                +------- add_rate_limited ---------+
//! ```

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod queue;
mod worker;

pub use cache::{wait_for_cache_sync, CacheError, CacheSynced, ObjectCache};
pub use dispatch::{dispatch, SyncHandler};
pub use error::{ControllerError, ResolveError, SyncError};
pub use handlers::{
    DependentsEventHandler, DependentsResolver, QueuingEventHandler, ResourceEventHandler,
};
pub use queue::{ObjectKey, WorkQueue};

use crate::constants::DEFAULT_CACHE_SYNC_POLL_MS;
use kube::Resource;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use worker::Worker;

/// A single controller instance
///
/// Owns its work queue and receives its caches and sync handler explicitly.
/// Register [`Controller::queuing_handler`] on the primary resource's informer and,
/// where needed, [`Controller::dependents_handler`] on secondary informers, then call
/// [`Controller::run`].
pub struct Controller<K> {
    name: Arc<str>,
    queue: WorkQueue,
    cache: Arc<dyn ObjectCache<K>>,
    handler: Arc<dyn SyncHandler<K>>,
    synced: Vec<Arc<dyn CacheSynced>>,
    sync_poll_interval: Duration,
}

impl<K> fmt::Debug for Controller<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("caches", &self.synced.len())
            .finish_non_exhaustive()
    }
}

impl<K> Controller<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Create a controller reconciling objects of `K` held in `cache`
    ///
    /// The primary cache is always part of the sync gate.
    pub fn new<C>(
        name: impl Into<String>,
        queue: WorkQueue,
        cache: Arc<C>,
        handler: Arc<dyn SyncHandler<K>>,
    ) -> Self
    where
        C: ObjectCache<K> + 'static,
    {
        let synced = Arc::clone(&cache) as Arc<dyn CacheSynced>;
        Self {
            name: Arc::from(name.into()),
            queue,
            cache,
            handler,
            synced: vec![synced],
            sync_poll_interval: Duration::from_millis(DEFAULT_CACHE_SYNC_POLL_MS),
        }
    }

    /// Also wait for `cache` before starting workers
    #[must_use]
    pub fn wait_for(mut self, cache: Arc<dyn CacheSynced>) -> Self {
        self.synced.push(cache);
        self
    }

    #[must_use]
    pub fn with_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Handler enqueueing every changed primary object
    #[must_use]
    pub fn queuing_handler(&self) -> QueuingEventHandler<K> {
        QueuingEventHandler::new(self.name.as_ref(), self.queue.clone())
    }

    /// Handler enqueueing the dependents of deleted secondary objects of type `S`
    #[must_use]
    pub fn dependents_handler<S: Resource>(
        &self,
        resolver: Arc<dyn DependentsResolver>,
    ) -> DependentsEventHandler<S> {
        DependentsEventHandler::new(self.name.as_ref(), self.queue.clone(), resolver)
    }

    /// Run until `stop` fires
    ///
    /// Waits for every cache to sync, starts `workers` workers, and on stop shuts the
    /// queue down and waits for all workers to exit.
    ///
    /// # Errors
    ///
    /// [`ControllerError::CacheSyncAborted`] if `stop` fires before the caches sync;
    /// no workers are started in that case.
    pub async fn run(&self, workers: usize, stop: CancellationToken) -> Result<(), ControllerError> {
        if workers == 0 {
            return Err(ControllerError::InvalidWorkerCount);
        }
        info!(controller = %self.name, workers, "Starting control loop");

        if !wait_for_cache_sync(&stop, &self.synced, self.sync_poll_interval).await {
            error!(controller = %self.name, "stop signalled before caches synced");
            return Err(ControllerError::CacheSyncAborted);
        }
        debug!(controller = %self.name, "caches synced");

        let mut set = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                controller: Arc::clone(&self.name),
                queue: self.queue.clone(),
                cache: Arc::clone(&self.cache),
                handler: Arc::clone(&self.handler),
                stop: stop.clone(),
            };
            set.spawn(worker.run());
        }

        stop.cancelled().await;
        info!(controller = %self.name, "Shutting down queue as workqueue signaled shutdown");
        self.queue.shut_down();

        info!(controller = %self.name, "Waiting for workers to exit...");
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(controller = %self.name, error = %e, "worker task failed");
            }
        }
        info!(controller = %self.name, "Workers exited.");
        Ok(())
    }
}
