//! # Issuer
//!
//! ClusterIssuer-specific wiring for the generic controller:
//!
//! - `dependents`: Secret → referencing ClusterIssuers
//! - `sync`: reconciliation checking referenced Secrets exist

mod dependents;
mod sync;

pub use dependents::IssuersForSecret;
pub use sync::SecretReferenceSync;
