//! # Custom Resource Definitions
//!
//! - `spec.rs` - ClusterIssuer specification and Secret references
//! - `status.rs` - Status types

mod spec;
mod status;

pub use spec::{
    AcmeIssuer, CaIssuer, ClusterIssuer, ClusterIssuerSpec, SecretKeySelector, VaultAppRole,
    VaultAuth, VaultIssuer,
};
pub use status::{ClusterIssuerStatus, Condition};
