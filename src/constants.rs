//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name of the ClusterIssuer controller, its work queue and its metric labels
pub const CONTROLLER_NAME: &str = "clusterissuers";

/// Default number of concurrent workers
pub const DEFAULT_WORKERS: usize = 5;

/// Namespace holding Secrets referenced by cluster-scoped resources
pub const DEFAULT_CLUSTER_RESOURCE_NAMESPACE: &str = "kube-system";

/// Per-key exponential backoff base (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Per-key exponential backoff cap (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Overall retry rate across all keys (per second)
pub const DEFAULT_RATE_LIMIT_QPS: f64 = 10.0;

/// Overall retry burst across all keys
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 100;

/// How often the cache-sync gate polls the caches (milliseconds)
pub const DEFAULT_CACHE_SYNC_POLL_MS: u64 = 100;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 9402;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
