//! # Issuers For Secret
//!
//! Maps a Secret back to the ClusterIssuers that reference it, so that deleting
//! a signing key re-triggers every issuer built on top of it.

use crate::controller::{DependentsResolver, ObjectCache, ObjectKey, ResolveError};
use crate::crd::ClusterIssuer;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Resolves a Secret key to the ClusterIssuers referencing it
///
/// Cluster issuers can only read Secrets from the cluster resource namespace;
/// Secrets anywhere else never have dependents.
pub struct IssuersForSecret {
    issuers: Arc<dyn ObjectCache<ClusterIssuer>>,
    cluster_resource_namespace: String,
}

impl fmt::Debug for IssuersForSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuersForSecret")
            .field("cluster_resource_namespace", &self.cluster_resource_namespace)
            .finish_non_exhaustive()
    }
}

impl IssuersForSecret {
    pub fn new(
        issuers: Arc<dyn ObjectCache<ClusterIssuer>>,
        cluster_resource_namespace: impl Into<String>,
    ) -> Self {
        Self {
            issuers,
            cluster_resource_namespace: cluster_resource_namespace.into(),
        }
    }
}

impl DependentsResolver for IssuersForSecret {
    fn find_dependents(&self, secret: &ObjectKey) -> Result<Vec<ObjectKey>, ResolveError> {
        if secret.namespace() != Some(self.cluster_resource_namespace.as_str()) {
            debug!(secret = %secret, "secret outside cluster resource namespace");
            return Ok(Vec::new());
        }
        if !self.issuers.has_synced() {
            return Err(ResolveError::CacheNotSynced("ClusterIssuer"));
        }

        let mut dependents: Vec<ObjectKey> = self
            .issuers
            .list()
            .iter()
            .filter(|issuer| issuer.spec.referenced_secret_names().contains(&secret.name()))
            .map(|issuer| ObjectKey::cluster(issuer.name_any()))
            .collect();
        dependents.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(dependents)
    }
}
