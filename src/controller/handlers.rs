//! # Event Handlers
//!
//! Translate watch notifications into work queue keys.
//!
//! The watch substrate calls handlers synchronously on its delivery task. Two
//! variants exist:
//!
//! - [`QueuingEventHandler`] enqueues the key of the changed primary object. It never
//!   blocks and handles add, update and delete.
//! - [`DependentsEventHandler`] reacts to the deletion of a secondary object by
//!   resolving the primary objects that reference it and enqueueing each. Resolution
//!   may scan a cache, so it reports [`ResourceEventHandler::may_block`] and the
//!   substrate runs it off the delivery path.

use super::error::ResolveError;
use super::queue::{ObjectKey, WorkQueue};
use crate::observability::metrics;
use kube::Resource;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Observer of add, update and delete notifications for objects of type `K`
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);

    /// Whether the handler may block and must be kept off the delivery path
    fn may_block(&self) -> bool {
        false
    }
}

/// Resolves which primary objects reference a secondary object
pub trait DependentsResolver: Send + Sync {
    /// Keys of every primary object depending on `secondary`
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the dependents cannot be determined.
    fn find_dependents(&self, secondary: &ObjectKey) -> Result<Vec<ObjectKey>, ResolveError>;
}

/// Enqueues the key of every changed primary object
pub struct QueuingEventHandler<K> {
    controller: String,
    queue: WorkQueue,
    _kind: PhantomData<fn(&K)>,
}

impl<K> fmt::Debug for QueuingEventHandler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuingEventHandler")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl<K: Resource> QueuingEventHandler<K> {
    pub fn new(controller: impl Into<String>, queue: WorkQueue) -> Self {
        Self {
            controller: controller.into(),
            queue,
            _kind: PhantomData,
        }
    }

    fn enqueue(&self, obj: &K, event: &'static str) {
        match ObjectKey::for_resource(obj) {
            Ok(key) => {
                debug!(controller = %self.controller, key = %key, event, "handler.enqueue");
                self.queue.add(key);
            }
            Err(e) => {
                // Indicates broken watch wiring; the next legitimate event recovers
                error!(controller = %self.controller, event, error = %e, "handler.invalid_object");
                metrics::increment_dropped_events(&self.controller, "invalid_key");
            }
        }
    }
}

impl<K: Resource> ResourceEventHandler<K> for QueuingEventHandler<K> {
    fn on_add(&self, obj: &K) {
        self.enqueue(obj, "add");
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.enqueue(new, "update");
    }

    fn on_delete(&self, obj: &K) {
        self.enqueue(obj, "delete");
    }
}

/// Enqueues the dependents of a deleted secondary object
///
/// Adds and updates of the secondary type are ignored: they are frequent, and
/// scanning the primary cache for each would starve the delivery path.
pub struct DependentsEventHandler<S> {
    controller: String,
    queue: WorkQueue,
    resolver: Arc<dyn DependentsResolver>,
    _kind: PhantomData<fn(&S)>,
}

impl<S> fmt::Debug for DependentsEventHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentsEventHandler")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl<S: Resource> DependentsEventHandler<S> {
    pub fn new(
        controller: impl Into<String>,
        queue: WorkQueue,
        resolver: Arc<dyn DependentsResolver>,
    ) -> Self {
        Self {
            controller: controller.into(),
            queue,
            resolver,
            _kind: PhantomData,
        }
    }
}

impl<S: Resource> ResourceEventHandler<S> for DependentsEventHandler<S> {
    fn on_add(&self, _obj: &S) {}

    fn on_update(&self, _old: &S, _new: &S) {}

    fn on_delete(&self, obj: &S) {
        let secondary = match ObjectKey::for_resource(obj) {
            Ok(key) => key,
            Err(e) => {
                error!(controller = %self.controller, error = %e, "handler.invalid_object");
                metrics::increment_dropped_events(&self.controller, "invalid_key");
                return;
            }
        };

        let dependents = match self.resolver.find_dependents(&secondary) {
            Ok(dependents) => dependents,
            Err(e) => {
                // Nothing is enqueued; dependents converge on their next own watch event
                warn!(
                    controller = %self.controller,
                    secondary = %secondary,
                    error = %e,
                    "handler.resolve_dependents_failed"
                );
                metrics::increment_dropped_events(&self.controller, "resolve_failed");
                return;
            }
        };

        debug!(
            controller = %self.controller,
            secondary = %secondary,
            dependents = dependents.len(),
            "handler.secondary_deleted"
        );
        for key in dependents {
            self.queue.add(key);
        }
    }

    fn may_block(&self) -> bool {
        true
    }
}
