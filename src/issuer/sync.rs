//! # Secret Reference Sync
//!
//! Reconciliation wired by the binary: verifies that every Secret a
//! ClusterIssuer reads is present. A missing Secret fails the sync so the key is
//! retried with backoff until the Secret appears.

use crate::controller::{ObjectCache, ObjectKey, SyncError, SyncHandler};
use crate::crd::ClusterIssuer;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct SecretReferenceSync {
    secrets: Arc<dyn ObjectCache<Secret>>,
    cluster_resource_namespace: String,
}

impl std::fmt::Debug for SecretReferenceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretReferenceSync")
            .field("cluster_resource_namespace", &self.cluster_resource_namespace)
            .finish_non_exhaustive()
    }
}

impl SecretReferenceSync {
    pub fn new(
        secrets: Arc<dyn ObjectCache<Secret>>,
        cluster_resource_namespace: impl Into<String>,
    ) -> Self {
        Self {
            secrets,
            cluster_resource_namespace: cluster_resource_namespace.into(),
        }
    }
}

#[async_trait]
impl SyncHandler<ClusterIssuer> for SecretReferenceSync {
    async fn sync(&self, ctx: CancellationToken, issuer: Arc<ClusterIssuer>) -> Result<(), SyncError> {
        let name = issuer.name_any();
        let mut missing = Vec::new();

        for secret_name in issuer.spec.referenced_secret_names() {
            if ctx.is_cancelled() {
                return Err(SyncError::Cancelled(ObjectKey::cluster(name)));
            }
            let key = ObjectKey::namespaced(&self.cluster_resource_namespace, secret_name);
            match self.secrets.get_by_key(&key) {
                Ok(Some(_)) => debug!(issuer = %name, secret = %key, "referenced secret present"),
                Ok(None) => missing.push(key.to_string()),
                Err(source) => return Err(SyncError::Lookup { key, source }),
            }
        }

        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "ClusterIssuer '{name}' references missing secrets: {}",
                missing.join(", ")
            )
            .into());
        }

        info!(issuer = %name, "all referenced secrets present");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{CacheError, CacheSynced};
    use crate::crd::{CaIssuer, ClusterIssuerSpec};
    use kube::api::ObjectMeta;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Secrets(HashMap<ObjectKey, Arc<Secret>>);

    impl Secrets {
        fn with(mut self, namespace: &str, name: &str) -> Self {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.0
                .insert(ObjectKey::namespaced(namespace, name), Arc::new(secret));
            self
        }
    }

    impl CacheSynced for Secrets {
        fn has_synced(&self) -> bool {
            true
        }
    }

    impl ObjectCache<Secret> for Secrets {
        fn get_by_key(&self, key: &ObjectKey) -> Result<Option<Arc<Secret>>, CacheError> {
            Ok(self.0.get(key).cloned())
        }

        fn list(&self) -> Vec<Arc<Secret>> {
            self.0.values().cloned().collect()
        }
    }

    fn ca_issuer(secret: &str) -> Arc<ClusterIssuer> {
        Arc::new(ClusterIssuer::new(
            "prod-ca",
            ClusterIssuerSpec {
                ca: Some(CaIssuer {
                    secret_name: secret.to_string(),
                }),
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn test_sync_succeeds_when_secret_present() {
        let sync = SecretReferenceSync::new(
            Arc::new(Secrets::default().with("kube-system", "ca-key")),
            "kube-system",
        );
        sync.sync(CancellationToken::new(), ca_issuer("ca-key"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_fails_when_secret_in_other_namespace() {
        let sync = SecretReferenceSync::new(
            Arc::new(Secrets::default().with("default", "ca-key")),
            "kube-system",
        );
        let err = sync
            .sync(CancellationToken::new(), ca_issuer("ca-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ReconciliationFailed(_)));
        assert!(err.to_string().contains("kube-system/ca-key"));
    }

    #[tokio::test]
    async fn test_sync_observes_cancellation() {
        let sync = SecretReferenceSync::new(Arc::new(Secrets::default()), "kube-system");
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = sync.sync(ctx, ca_issuer("ca-key")).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled(_)));
    }
}
