//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `clusterissuer_controller_workqueue_depth` - Keys ready for delivery, per queue
//! - `clusterissuer_controller_workqueue_adds_total` - Keys added, per queue
//! - `clusterissuer_controller_workqueue_retries_total` - Rate-limited re-adds, per queue
//! - `clusterissuer_controller_workqueue_queue_duration_seconds` - Time a key waits before delivery
//! - `clusterissuer_controller_workqueue_work_duration_seconds` - Time between `get` and `done`
//! - `clusterissuer_controller_reconciliations_total` - Reconciliations by result
//! - `clusterissuer_controller_dropped_events_total` - Watch events dropped by handlers

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WORKQUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "clusterissuer_controller_workqueue_depth",
            "Current number of keys ready for delivery",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_DEPTH metric - this should never happen")
});

static WORKQUEUE_ADDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clusterissuer_controller_workqueue_adds_total",
            "Total number of keys added to the work queue",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_ADDS_TOTAL metric - this should never happen")
});

static WORKQUEUE_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clusterissuer_controller_workqueue_retries_total",
            "Total number of rate-limited re-adds",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_RETRIES_TOTAL metric - this should never happen")
});

static WORKQUEUE_QUEUE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "clusterissuer_controller_workqueue_queue_duration_seconds",
            "How long a key waits in the work queue before delivery",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_QUEUE_DURATION metric - this should never happen")
});

static WORKQUEUE_WORK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "clusterissuer_controller_workqueue_work_duration_seconds",
            "How long processing a key takes",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_WORK_DURATION metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clusterissuer_controller_reconciliations_total",
            "Total number of reconciliations by result",
        ),
        &["controller", "result"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static DROPPED_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clusterissuer_controller_dropped_events_total",
            "Total number of watch events dropped by event handlers",
        ),
        &["controller", "reason"],
    )
    .expect("Failed to create DROPPED_EVENTS_TOTAL metric - this should never happen")
});

/// Register every metric with the process registry
///
/// Call once at startup. Metrics are recorded whether or not they are registered;
/// registration only makes them visible on `/metrics`.
///
/// # Errors
///
/// Fails if a metric is already registered.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(WORKQUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_ADDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_QUEUE_DURATION.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_WORK_DURATION.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_EVENTS_TOTAL.clone()))?;

    Ok(())
}

/// Gather every registered metric family
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    WORKQUEUE_DEPTH
        .with_label_values(&[queue])
        .set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_queue_adds(queue: &str) {
    WORKQUEUE_ADDS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn increment_queue_retries(queue: &str) {
    WORKQUEUE_RETRIES_TOTAL.with_label_values(&[queue]).inc();
}

pub fn observe_queue_latency(queue: &str, seconds: f64) {
    WORKQUEUE_QUEUE_DURATION
        .with_label_values(&[queue])
        .observe(seconds);
}

pub fn observe_work_duration(queue: &str, seconds: f64) {
    WORKQUEUE_WORK_DURATION
        .with_label_values(&[queue])
        .observe(seconds);
}

/// Record a reconciliation outcome: `success`, `error` or `cancelled`
pub fn increment_reconciliations(controller: &str, result: &str) {
    RECONCILIATIONS_TOTAL
        .with_label_values(&[controller, result])
        .inc();
}

/// Record a watch event a handler could not turn into a key
pub fn increment_dropped_events(controller: &str, reason: &str) {
    DROPPED_EVENTS_TOTAL
        .with_label_values(&[controller, reason])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_label() {
        increment_reconciliations("metrics-test", "success");
        increment_reconciliations("metrics-test", "success");
        increment_reconciliations("metrics-test", "error");

        let success = RECONCILIATIONS_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        let error = RECONCILIATIONS_TOTAL
            .with_label_values(&["metrics-test", "error"])
            .get();
        assert_eq!(success, 2);
        assert_eq!(error, 1);
    }

    #[test]
    fn test_queue_depth_is_a_gauge() {
        set_queue_depth("metrics-test-queue", 7);
        set_queue_depth("metrics-test-queue", 3);
        assert_eq!(
            WORKQUEUE_DEPTH
                .with_label_values(&["metrics-test-queue"])
                .get(),
            3
        );
    }
}
