//! The store seam.
//!
//! Every cluster read and write a reconciler performs goes through [`Store`].
//! Implementations enforce optimistic concurrency: `update` and
//! `update_status` are conditional on `meta.resource_version` of the object
//! passed in.

use async_trait::async_trait;
use thiserror::Error;

use crate::object::{Object, ResourceKind};

/// Store operation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// The write was based on a stale resource version.
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: ResourceKind,
        namespace: String,
        name: String,
        message: String,
    },

    /// The request was rejected as invalid by the store.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Network or API failure; safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for optimistic-concurrency collisions.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }

    /// Returns true for errors worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Deletion propagation policy for owned dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Delete the object now; dependents are collected in the background.
    #[default]
    Background,
    /// Delete dependents before the object itself.
    Foreground,
    /// Leave dependents behind.
    Orphan,
}

impl Propagation {
    /// The policy name used by the cluster API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "Background",
            Self::Foreground => "Foreground",
            Self::Orphan => "Orphan",
        }
    }
}

/// Cluster object store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read an object by kind and name. Absence is `Ok(None)`.
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> StoreResult<Option<Object>>;

    /// Create an object. Fails with `AlreadyExists` on a name collision.
    async fn create(&self, object: &Object) -> StoreResult<Object>;

    /// Replace an object's metadata and body. Fails with `Conflict` if
    /// `object.meta.resource_version` is stale. Status is left untouched.
    async fn update(&self, object: &Object) -> StoreResult<Object>;

    /// Replace an object's status subresource, conditional like `update`.
    async fn update_status(&self, object: &Object) -> StoreResult<Object>;

    /// Delete an object. Fails with `NotFound` if it is absent.
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let conflict = StoreError::Conflict {
            kind: ResourceKind::Service,
            namespace: "default".to_string(),
            name: "hr-service".to_string(),
            message: "resource version 3 is stale".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
        assert!(StoreError::Transient("connection reset".to_string()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = StoreError::NotFound {
            kind: ResourceKind::Cell,
            namespace: "default".to_string(),
            name: "hr".to_string(),
        };
        assert_eq!(err.to_string(), "Cell default/hr not found");
    }
}
