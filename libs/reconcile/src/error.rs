//! Reconcile errors.

use thiserror::Error;

use crate::object::ResourceKind;
use crate::store::StoreError;

/// Errors from reconciling one child kind or a whole parent.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// A same-named child exists but is not controlled by this parent.
    #[error("{kind} {namespace}/{name} exists and is not owned by this instance")]
    NotOwned {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// The parent spec (or its dependency annotation) cannot be compiled.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// One or more child kinds failed during a pass.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl ReconcileError {
    /// Permanent errors keep failing until someone edits the cluster or the
    /// spec.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::NotOwned { .. } | Self::InvalidSpec(_) => true,
            Self::Store(err) => matches!(err, StoreError::Invalid(_)),
            Self::Aggregate(agg) => agg.failures.iter().all(|f| f.error.is_permanent()),
        }
    }

    /// Returns true if a fresh read may resolve the error.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Store(err) => err.is_conflict(),
            _ => false,
        }
    }
}

/// One failed child kind.
#[derive(Debug, Clone)]
pub struct KindFailure {
    /// Label of the failed child kind (e.g. `Service` or `ConfigMap/hr-config`).
    pub kind: String,

    pub error: ReconcileError,
}

impl std::fmt::Display for KindFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// Pass-level error listing every failed child kind.
#[derive(Debug, Clone, Error)]
#[error("{} of {attempted} child kinds failed: {}", .failures.len(), join(.failures))]
pub struct AggregateError {
    /// Number of child kinds attempted in the pass.
    pub attempted: usize,

    /// Failures in attempt order.
    pub failures: Vec<KindFailure>,
}

fn join(failures: &[KindFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregateError {
    /// Names of the failed child kinds.
    pub fn failed_kinds(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.kind.as_str()).collect()
    }
}
