//! # ClusterIssuer Controller
//!
//! Watches ClusterIssuer resources and the Secrets they reference, and reconciles
//! each issuer whenever it or one of its Secrets changes.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the current kubeconfig context
//! clusterissuer-controller --workers 10
//!
//! # Reconcile specific issuers right away, ahead of the initial listing
//! clusterissuer-controller --reconcile prod-ca --reconcile letsencrypt
//!
//! # Print the CRD manifest
//! clusterissuer-controller --print-crd
//! ```
//!
//! Every setting can also be provided through environment variables; see
//! `ControllerConfig::from_env`.

use anyhow::{Context, Result};
use clap::Parser;
use clusterissuer_controller::config::ControllerConfig;
use clusterissuer_controller::controller::ObjectKey;
use clusterissuer_controller::crd::ClusterIssuer;
use clusterissuer_controller::runtime::initialize;
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// ClusterIssuer reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "clusterissuer-controller", version, about, long_about = None)]
struct Cli {
    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Namespace holding Secrets referenced by ClusterIssuers
    #[arg(long)]
    cluster_resource_namespace: Option<String>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Queue this key (`name` or `namespace/name`) at startup; repeatable
    #[arg(long = "reconcile", value_name = "KEY")]
    reconcile: Vec<ObjectKey>,

    /// Print the ClusterIssuer CRD as JSON and exit
    #[arg(long)]
    print_crd: bool,
}

impl Cli {
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(namespace) = self.cluster_resource_namespace {
            config.cluster_resource_namespace = namespace;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if cli.print_crd {
        let crd = serde_json::to_string_pretty(&ClusterIssuer::crd())
            .context("Failed to serialize CRD")?;
        println!("{crd}");
        return Ok(());
    }

    let seed = std::mem::take(&mut cli.reconcile);
    let config = cli.apply(ControllerConfig::from_env());
    let runtime = initialize(config).await?;
    for key in seed {
        info!(key = %key, "Queueing key from command line");
        runtime.controller.queue().add(key);
    }

    let stop = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(stop.clone()));

    runtime.run(stop).await
}

/// Cancel `stop` on SIGINT or SIGTERM
async fn shutdown_on_signal(stop: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
    stop.cancel();
}
