//! # Logging
//!
//! Tracing subscriber setup. `RUST_LOG` wins over the configured level when set.

use crate::config::{ControllerConfig, LogFormat};
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(config.log_enable_color).try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn default_directive(level: &str) -> String {
    format!(
        "clusterissuer_controller={},kube=warn",
        level.to_ascii_lowercase()
    )
}
