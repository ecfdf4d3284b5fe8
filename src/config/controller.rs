//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_CACHE_SYNC_POLL_MS,
    DEFAULT_CLUSTER_RESOURCE_NAMESPACE, DEFAULT_LOG_LEVEL, DEFAULT_METRICS_PORT,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_QPS, DEFAULT_WORKERS,
};
use crate::controller::queue::RateLimiterSettings;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent workers draining the queue
    pub workers: usize,
    /// Namespace holding Secrets referenced by ClusterIssuers
    pub cluster_resource_namespace: String,
    /// Per-key backoff base (milliseconds)
    pub backoff_base_ms: u64,
    /// Per-key backoff cap (seconds)
    pub backoff_max_secs: u64,
    /// Overall retry rate across keys (per second)
    pub rate_limit_qps: f64,
    /// Overall retry burst across keys
    pub rate_limit_burst: u32,
    /// Cache-sync gate poll interval (milliseconds)
    pub cache_sync_poll_ms: u64,
    /// Port for `/metrics` and `/healthz`
    pub metrics_port: u16,
    /// Global log level (error, warn, info, debug, trace)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Enable color in text format logs
    pub log_enable_color: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cluster_resource_namespace: DEFAULT_CLUSTER_RESOURCE_NAMESPACE.to_string(),
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            rate_limit_qps: DEFAULT_RATE_LIMIT_QPS,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            cache_sync_poll_ms: DEFAULT_CACHE_SYNC_POLL_MS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Text,
            log_enable_color: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            workers: parse_or(&lookup, "WORKERS", defaults.workers).max(1),
            cluster_resource_namespace: lookup("CLUSTER_RESOURCE_NAMESPACE")
                .filter(|ns| !ns.is_empty())
                .unwrap_or(defaults.cluster_resource_namespace),
            backoff_base_ms: parse_or(&lookup, "BACKOFF_BASE_MS", defaults.backoff_base_ms),
            backoff_max_secs: parse_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            rate_limit_qps: parse_or(&lookup, "RATE_LIMIT_QPS", defaults.rate_limit_qps),
            rate_limit_burst: parse_or(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst),
            cache_sync_poll_ms: parse_or(
                &lookup,
                "CACHE_SYNC_POLL_MS",
                defaults.cache_sync_poll_ms,
            ),
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or(&lookup, "LOG_FORMAT", defaults.log_format),
            log_enable_color: lookup("LOG_ENABLE_COLOR")
                .map_or(defaults.log_enable_color, |v| parse_bool(&v)),
        }
    }

    /// Rate limiter settings for the work queue
    #[must_use]
    pub fn rate_limiter_settings(&self) -> RateLimiterSettings {
        RateLimiterSettings {
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            qps: self.rate_limit_qps,
            burst: self.rate_limit_burst,
        }
    }

    /// Get cache-sync poll interval duration
    #[must_use]
    pub fn cache_sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sync_poll_ms)
    }
}

/// Parse a value or fall back to the default when unset or invalid
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
