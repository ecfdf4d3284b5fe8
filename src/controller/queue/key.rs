//! # Object Keys
//!
//! Strongly typed work queue keys.
//!
//! A key identifies an object by its optional namespace and its name. Cluster-scoped
//! objects render as `name`, namespaced objects as `namespace/name`, matching the
//! key format used by Kubernetes client caches.

use kube::Resource;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when deriving or parsing a key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The object carries no `metadata.name`
    #[error("object has no metadata.name")]
    MissingName,
    /// The string is not of the form `name` or `namespace/name`
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
}

/// Identity of an object in the work queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Derive the key of a Kubernetes object from its metadata
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingName`] when the object has no name.
    pub fn for_resource<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(KeyError::MissingName)?;
        Ok(match meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => Self::namespaced(ns, name),
            None => Self::cluster(name),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Parses `name`, `/name` or `namespace/name`, as given to `--reconcile`
impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(*name)),
            // An empty namespace segment means a cluster-scoped key
            ["", name] if !name.is_empty() => Ok(Self::cluster(*name)),
            [ns, name] if !name.is_empty() => Ok(Self::namespaced(*ns, *name)),
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}
