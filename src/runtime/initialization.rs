//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! Kubernetes client setup and wiring informers, handlers and the controller
//! together.

use crate::config::ControllerConfig;
use crate::constants::CONTROLLER_NAME;
use crate::controller::queue::default_controller_rate_limiter;
use crate::controller::{CacheSynced, Controller, ObjectCache, WorkQueue};
use crate::crd::ClusterIssuer;
use crate::issuer::{IssuersForSecret, SecretReferenceSync};
use crate::observability;
use crate::runtime::informer::Informer;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};
use kube_runtime::watcher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Everything needed to run the controller, wired but not yet started
pub struct InitializationResult {
    pub config: ControllerConfig,
    pub controller: Controller<ClusterIssuer>,
    pub issuer_informer: Informer<ClusterIssuer>,
    pub secret_informer: Informer<Secret>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("controller", &self.controller)
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - Kubernetes client creation
/// - Informer, handler and controller wiring
///
/// # Errors
///
/// Fails if logging or metrics cannot be initialized or no Kubernetes client can
/// be built.
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    observability::logging::init_logging(&config).context("Failed to initialize logging")?;

    info!("Starting ClusterIssuer Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    Ok(wire(client, config))
}

/// Build informers and the controller on top of `client`
#[must_use]
pub fn wire(client: Client, config: ControllerConfig) -> InitializationResult {
    let namespace = config.cluster_resource_namespace.clone();

    let issuers: Api<ClusterIssuer> = Api::all(client.clone());
    // Cluster issuers can only reference Secrets in this namespace
    let secrets: Api<Secret> = Api::namespaced(client, &namespace);

    let mut issuer_informer = Informer::new(issuers, watcher::Config::default());
    let mut secret_informer = Informer::new(secrets, watcher::Config::default());
    let issuer_cache = issuer_informer.cache();
    let secret_cache = secret_informer.cache();

    let queue = WorkQueue::new(
        CONTROLLER_NAME,
        default_controller_rate_limiter(config.rate_limiter_settings()),
    );
    let secret_lookup: Arc<dyn ObjectCache<Secret>> = secret_cache.clone();
    let secret_synced: Arc<dyn CacheSynced> = secret_cache;
    let controller = Controller::new(
        CONTROLLER_NAME,
        queue,
        issuer_cache.clone(),
        Arc::new(SecretReferenceSync::new(secret_lookup, namespace.clone())),
    )
    .wait_for(Arc::clone(&secret_synced))
    .with_sync_poll_interval(config.cache_sync_poll_interval());

    issuer_informer.add_event_handler(Arc::new(controller.queuing_handler()));
    let issuer_lookup: Arc<dyn ObjectCache<ClusterIssuer>> = issuer_cache.clone();
    secret_informer.add_event_handler(Arc::new(
        controller.dependents_handler::<Secret>(Arc::new(IssuersForSecret::new(
            issuer_lookup,
            namespace,
        ))),
    ));

    let issuer_synced: Arc<dyn CacheSynced> = issuer_cache;
    let server_state = Arc::new(ServerState::new(vec![issuer_synced, secret_synced]));

    InitializationResult {
        config,
        controller,
        issuer_informer,
        secret_informer,
        server_state,
    }
}

impl InitializationResult {
    /// Run the server, informers and controller until `stop` fires
    ///
    /// # Errors
    ///
    /// Fails if the controller aborts before its caches sync.
    pub async fn run(self, stop: CancellationToken) -> Result<()> {
        let Self {
            config,
            controller,
            issuer_informer,
            secret_informer,
            server_state,
        } = self;

        let server = tokio::spawn({
            let state = Arc::clone(&server_state);
            let stop = stop.clone();
            let port = config.metrics_port;
            async move {
                if let Err(e) = start_server(port, state, stop).await {
                    error!("HTTP server error: {}", e);
                }
            }
        });
        let informers = [
            tokio::spawn(issuer_informer.run(stop.clone())),
            tokio::spawn(secret_informer.run(stop.clone())),
        ];

        info!("Controller initialized, starting workers...");
        let result = controller.run(config.workers, stop.clone()).await;
        server_state.mark_shutting_down();
        // Informers and server exit on the same token
        stop.cancel();

        for informer in informers {
            if let Err(e) = informer.await {
                error!("Informer task failed: {}", e);
            }
        }
        if let Err(e) = server.await {
            error!("HTTP server task failed: {}", e);
        }

        result.context("Controller exited with error")?;
        info!("Controller stopped");
        Ok(())
    }
}
