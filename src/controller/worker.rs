//! # Worker
//!
//! A long-lived task draining the work queue one key at a time.

use super::cache::ObjectCache;
use super::dispatch::{dispatch, SyncHandler};
use super::error::SyncError;
use super::queue::{ObjectKey, WorkQueue};
use crate::observability::metrics;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

pub(crate) struct Worker<K> {
    pub(crate) id: usize,
    pub(crate) controller: Arc<str>,
    pub(crate) queue: WorkQueue,
    pub(crate) cache: Arc<dyn ObjectCache<K>>,
    pub(crate) handler: Arc<dyn SyncHandler<K>>,
    pub(crate) stop: CancellationToken,
}

impl<K: Send + Sync + 'static> Worker<K> {
    /// Process keys until the queue shuts down
    pub(crate) async fn run(self) {
        info!(controller = %self.controller, worker = self.id, "starting worker");
        while self.process_next_item().await {}
        info!(controller = %self.controller, worker = self.id, "exiting worker loop");
    }

    /// Returns `false` once the queue has shut down
    async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        // Cancelled when this item finishes or when the controller stops
        let ctx = self.stop.child_token();
        let guard = ctx.clone().drop_guard();

        let span = tracing::info_span!(
            "controller.worker.sync",
            controller = %self.controller,
            worker = self.id,
            key = %key
        );
        debug!(parent: &span, "syncing item");
        let result = AssertUnwindSafe(dispatch(
            self.cache.as_ref(),
            self.handler.as_ref(),
            ctx,
            &key,
        ))
        .catch_unwind()
        .instrument(span.clone())
        .await
        .unwrap_or_else(|_| {
            error!(parent: &span, "sync handler panicked");
            Err(SyncError::ReconciliationFailed(anyhow::anyhow!(
                "sync handler panicked"
            )))
        });
        drop(guard);

        match result {
            Ok(()) => {
                self.queue.forget(&key);
                self.queue.done(&key);
                metrics::increment_reconciliations(&self.controller, "success");
                debug!(parent: &span, "synced item");
            }
            Err(e) => {
                // done must precede the re-add to release the processing mark
                self.queue.done(&key);
                self.requeue(&span, key, &e);
            }
        }
        true
    }

    fn requeue(&self, span: &tracing::Span, key: ObjectKey, error: &SyncError) {
        let outcome = if matches!(error, SyncError::Cancelled(_)) {
            "cancelled"
        } else {
            "error"
        };
        metrics::increment_reconciliations(&self.controller, outcome);

        if self.stop.is_cancelled() || self.queue.is_shutting_down() {
            // The queue drops re-adds from here on
            debug!(parent: span, error = %error, "dropping item on shutdown");
            return;
        }

        let delay = self.queue.add_rate_limited(key.clone());
        let next_retry = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| chrono::Utc::now().checked_add_signed(d))
            .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339());
        warn!(
            parent: span,
            error = %error,
            retries = self.queue.num_requeues(&key),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            next_retry = next_retry.as_str(),
            "requeuing item due to error processing"
        );
    }
}
