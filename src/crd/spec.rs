//! # ClusterIssuer Spec
//!
//! Main CRD specification types.

use serde::{Deserialize, Serialize};

/// ClusterIssuer Custom Resource Definition
///
/// A cluster-scoped certificate issuer. Secrets it references live in the
/// controller's cluster resource namespace.
///
/// # Example
///
/// ```yaml
/// apiVersion: certmanager.k8s.io/v1alpha1
/// kind: ClusterIssuer
/// metadata:
///   name: prod-ca
/// spec:
///   ca:
///     secretName: ca-key
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "ClusterIssuer",
    group = "certmanager.k8s.io",
    version = "v1alpha1",
    status = "crate::crd::ClusterIssuerStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme: Option<AcmeIssuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultIssuer>,
}

/// Reference to a key within a Secret in the cluster resource namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// ACME issuer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeIssuer {
    pub server: String,
    #[serde(default)]
    pub email: String,
    /// Secret holding the ACME account private key
    pub private_key_secret_ref: SecretKeySelector,
}

/// CA issuer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret holding the signing key pair
    pub secret_name: String,
}

/// Vault issuer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultIssuer {
    pub server: String,
    pub path: String,
    pub auth: VaultAuth,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_role: Option<VaultAppRole>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultAppRole {
    pub path: String,
    pub role_id: String,
    pub secret_ref: SecretKeySelector,
}

impl ClusterIssuerSpec {
    /// Names of every Secret this issuer reads, deduplicated
    #[must_use]
    pub fn referenced_secret_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(acme) = &self.acme {
            names.push(&acme.private_key_secret_ref.name);
        }
        if let Some(ca) = &self.ca {
            names.push(&ca.secret_name);
        }
        if let Some(vault) = &self.vault {
            if let Some(token) = &vault.auth.token_secret_ref {
                names.push(&token.name);
            }
            if let Some(app_role) = &vault.auth.app_role {
                names.push(&app_role.secret_ref.name);
            }
        }
        names.retain(|name| !name.is_empty());
        names.sort_unstable();
        names.dedup();
        names
    }
}
