//! Reconciliation primitives for the cellmesh controller.
//!
//! This library holds everything a parent orchestrator needs to converge one
//! child kind toward its desired content:
//!
//! - **Object model**: kinds, metadata, owner links ([`Object`], [`OwnerLink`]).
//! - **Store seam**: the only way reconcilers read or write the cluster
//!   ([`Store`]).
//! - **Child descriptors**: pure per-kind knowledge of name, requirement,
//!   desired content and mutable fields ([`ChildDescriptor`]).
//! - **Kind reconciler**: the single parameterized protocol that drives a
//!   descriptor against the store ([`KindReconciler`]).
//! - **Aggregation**: independent per-kind failures collected into one
//!   pass-level error ([`ErrorAggregator`]).
//!
//! # Invariants
//!
//! - Children are only ever located by their deterministic name.
//! - A child is mutated or deleted only if its owner link equals the parent's.
//! - Update calls are skipped when neither the parent nor the child changed
//!   since the last recorded write.

mod aggregate;
mod descriptor;
mod error;
mod fields;
mod hash;
mod object;
mod reconciler;
mod retry;
mod store;

pub use aggregate::ErrorAggregator;
pub use descriptor::{
    instance_key, ChildDescriptor, Desired, Parent, Stage, UpdateStrategy,
};
pub use error::{AggregateError, KindFailure, ReconcileError};
pub use fields::FieldSet;
pub use hash::ContentHash;
pub use object::{
    ForeignOwner, Object, ObjectKey, ObjectMeta, OwnerLink, ResourceKind, MESH_GROUP, MESH_VERSION,
};
pub use reconciler::{ChildOutcome, KindReconciler};
pub use retry::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX};
pub use store::{Propagation, Store, StoreError, StoreResult};
