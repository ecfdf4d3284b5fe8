//! # Errors
//!
//! Error types crossing the controller's boundaries.

use super::cache::CacheError;
use super::queue::ObjectKey;
use thiserror::Error;

/// Failure of a single reconciliation
///
/// Every variant is retryable: the worker re-adds the key with backoff.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
    #[error("looking up '{key}' in cache: {source}")]
    Lookup {
        key: ObjectKey,
        #[source]
        source: CacheError,
    },
    #[error("reconciliation of '{0}' was cancelled")]
    Cancelled(ObjectKey),
}

/// Failure resolving the primary objects that depend on a secondary object
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cache for {0} has not synced")]
    CacheNotSynced(&'static str),
    #[error("resolving dependents of '{key}': {reason}")]
    Lookup { key: ObjectKey, reason: String },
}

/// Failure of the controller lifecycle itself
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("error waiting for informer caches to sync")]
    CacheSyncAborted,
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
}
