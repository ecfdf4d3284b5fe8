//! # Runtime
//!
//! - `informer`: watch + reflector store feeding event handlers
//! - `initialization`: process bootstrap and wiring

pub mod informer;
pub mod initialization;

pub use informer::{Informer, ReflectorCache, Watched};
pub use initialization::{initialize, wire, InitializationResult};
