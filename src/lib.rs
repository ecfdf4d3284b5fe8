//! ClusterIssuer Controller Library
//!
//! A level-triggered reconciliation controller for cluster-scoped certificate
//! issuers. Watch notifications become keys on a deduplicating, rate-limited work
//! queue, drained by a pool of workers once every local cache has synced. Deleting
//! a Secret re-queues every ClusterIssuer that references it.
//!
//! ## Module Structure
//!
//! - `config`: environment-driven configuration
//! - `constants`: defaults
//! - `controller`: work queue, handlers, dispatch and worker lifecycle
//! - `crd`: the ClusterIssuer custom resource
//! - `issuer`: ClusterIssuer dependency resolution and reconciliation
//! - `observability`: logging and Prometheus metrics
//! - `runtime`: informers and process bootstrap
//! - `server`: metrics and probe endpoints

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod issuer;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
