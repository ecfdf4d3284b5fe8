//! # Cache
//!
//! Read-only view of the local object caches populated by the watch layer, and the
//! gate that holds workers back until every cache has completed its initial listing.

use super::queue::ObjectKey;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors returned by a cache lookup
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache for {kind} is unavailable: {reason}")]
    Unavailable { kind: &'static str, reason: String },
}

/// Reports whether a cache has seen its initial full listing
pub trait CacheSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Point-in-time lookups against an eventually consistent cache
pub trait ObjectCache<K>: CacheSynced {
    /// Look up an object by key; `Ok(None)` means the cache does not hold it
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the cache cannot answer.
    fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<K>>, CacheError>;

    /// Snapshot of every cached object
    fn list(&self) -> Vec<Arc<K>>;
}

/// Wait until every cache reports synced
///
/// Polls `caches` every `poll_interval`. Returns `false` if `stop` fires first.
pub async fn wait_for_cache_sync(
    stop: &CancellationToken,
    caches: &[Arc<dyn CacheSynced>],
    poll_interval: Duration,
) -> bool {
    loop {
        if caches.iter().all(|cache| cache.has_synced()) {
            return true;
        }
        debug!(caches = caches.len(), "cache.sync.waiting");
        tokio::select! {
            () = stop.cancelled() => return false,
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
