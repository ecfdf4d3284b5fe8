//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use clusterissuer_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Controller core
pub use crate::controller::{
    dispatch, wait_for_cache_sync, CacheError, CacheSynced, Controller, ControllerError,
    DependentsResolver, ObjectCache, ObjectKey, ResolveError, ResourceEventHandler, SyncError,
    SyncHandler, WorkQueue,
};

// Config types
pub use crate::config::{ControllerConfig, LogFormat};
