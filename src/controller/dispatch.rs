//! # Dispatch
//!
//! Resolves a queued key to its cached primary object and hands it to the
//! reconciliation function.

use super::cache::ObjectCache;
use super::error::SyncError;
use super::queue::ObjectKey;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reconciles a single primary object
///
/// Implementations must be idempotent: the same object may be synced many times.
/// `ctx` is cancelled when processing of the item ends or the controller stops;
/// long-running work should observe it.
#[async_trait]
pub trait SyncHandler<K>: Send + Sync {
    /// # Errors
    ///
    /// Any error is treated as transient and the key is retried with backoff.
    async fn sync(&self, ctx: CancellationToken, obj: Arc<K>) -> Result<(), SyncError>;
}

/// Process one key
///
/// An object missing from the cache was deleted after the key was queued; that is
/// success and the sync handler is not called. Cancellation is reported as
/// [`SyncError::Cancelled`] so the worker retries rather than forgets.
///
/// # Errors
///
/// Returns the lookup error, the cancellation, or the sync handler's error.
pub async fn dispatch<K: Send + Sync>(
    cache: &dyn ObjectCache<K>,
    handler: &dyn SyncHandler<K>,
    ctx: CancellationToken,
    key: &ObjectKey,
) -> Result<(), SyncError> {
    if ctx.is_cancelled() {
        return Err(SyncError::Cancelled(key.clone()));
    }

    let obj = match cache.get_by_key(key) {
        Ok(Some(obj)) => obj,
        Ok(None) => {
            info!(key = %key, "object in work queue no longer exists");
            return Ok(());
        }
        Err(source) => {
            return Err(SyncError::Lookup {
                key: key.clone(),
                source,
            })
        }
    };

    debug!(key = %key, "dispatch.sync");
    tokio::select! {
        biased;
        result = handler.sync(ctx.clone(), obj) => result,
        () = ctx.cancelled() => Err(SyncError::Cancelled(key.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::cache::{CacheError, CacheSynced};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MapCache {
        objects: HashMap<ObjectKey, Arc<String>>,
        broken: bool,
    }

    impl CacheSynced for MapCache {
        fn has_synced(&self) -> bool {
            true
        }
    }

    impl ObjectCache<String> for MapCache {
        fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<String>>, CacheError> {
            if self.broken {
                return Err(CacheError::Unavailable {
                    kind: "String",
                    reason: "index corrupted".to_string(),
                });
            }
            Ok(self.objects.get(key).cloned())
        }

        fn list(&self) -> Vec<Arc<String>> {
            self.objects.values().cloned().collect()
        }
    }

    #[derive(Default)]
    struct CountingSync {
        calls: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl SyncHandler<String> for CountingSync {
        async fn sync(&self, _ctx: CancellationToken, obj: Arc<String>) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            if obj.as_str() == "fails" {
                return Err(anyhow::anyhow!("upstream unavailable").into());
            }
            Ok(())
        }
    }

    fn cache_with(name: &str, value: &str) -> MapCache {
        MapCache {
            objects: HashMap::from([(ObjectKey::cluster(name), Arc::new(value.to_string()))]),
            broken: false,
        }
    }

    #[tokio::test]
    async fn test_not_found_is_success_without_sync() {
        let cache = MapCache::default();
        let handler = CountingSync::default();

        let result = dispatch(
            &cache,
            &handler,
            CancellationToken::new(),
            &ObjectKey::cluster("gone"),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_returned() {
        let cache = MapCache {
            broken: true,
            ..Default::default()
        };
        let handler = CountingSync::default();

        let result = dispatch(
            &cache,
            &handler,
            CancellationToken::new(),
            &ObjectKey::cluster("a"),
        )
        .await;

        assert!(matches!(result, Err(SyncError::Lookup { .. })));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_result_is_propagated() {
        let handler = CountingSync::default();

        let ok = dispatch(
            &cache_with("a", "fine"),
            &handler,
            CancellationToken::new(),
            &ObjectKey::cluster("a"),
        )
        .await;
        let err = dispatch(
            &cache_with("b", "fails"),
            &handler,
            CancellationToken::new(),
            &ObjectKey::cluster("b"),
        )
        .await;

        assert!(ok.is_ok());
        assert!(matches!(err, Err(SyncError::ReconciliationFailed(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_sync() {
        let handler = CountingSync::default();
        let ctx = CancellationToken::new();
        ctx.cancel();

        let result = dispatch(&cache_with("a", "fine"), &handler, ctx, &ObjectKey::cluster("a")).await;

        assert!(matches!(result, Err(SyncError::Cancelled(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_sync() {
        let handler = CountingSync {
            hang: true,
            ..Default::default()
        };
        let ctx = CancellationToken::new();
        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancel() })
        };

        let result = dispatch(&cache_with("a", "fine"), &handler, ctx, &ObjectKey::cluster("a")).await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
