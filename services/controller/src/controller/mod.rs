//! Parent reconcile orchestration.
//!
//! One [`Orchestrator`] per parent kind runs every child kind of a parent in
//! stage order, aggregates the failures and writes the parent status at most
//! once per pass. What differs between parent kinds lives behind
//! [`ParentController`].

mod kinds;
mod orchestrator;

use async_trait::async_trait;
use cellmesh_reconcile::{ChildDescriptor, ObjectKey, ReconcileError, ResourceKind};
use serde::de::DeserializeOwned;

pub use kinds::{
    CellController, ComponentController, CompositeController, GatewayController,
    TokenServiceController,
};
pub use orchestrator::Orchestrator;

use crate::model::{AggregateState, ParentInstance};
use crate::routing::Caller;
use crate::state::MeshState;

/// Children of a parent kind, as listed for one pass.
pub type Children<S> = Vec<Box<dyn ChildDescriptor<ParentInstance<S>>>>;

/// Per-kind knowledge the orchestrator needs about a parent kind.
pub trait ParentController: Send + Sync + 'static {
    /// Parsed spec of the parent.
    type Spec: DeserializeOwned + Send + Sync + 'static;

    const KIND: ResourceKind;

    /// Every child kind the parent may have this pass, required or not.
    fn children(&self, parent: &ParentInstance<Self::Spec>, state: &MeshState) -> Children<Self::Spec>;

    /// Identity the parent routes to its dependencies with. Kinds without
    /// dependencies return `None`.
    fn caller(&self, parent: &ParentInstance<Self::Spec>) -> Option<Caller> {
        let _ = parent;
        None
    }

    /// Aggregate readiness from the observed child status. May also update
    /// derived counters on the status.
    fn aggregate(&self, parent: &mut ParentInstance<Self::Spec>) -> AggregateState;
}

/// A reconcile pass for one parent kind, keyed by namespace and name.
#[async_trait]
pub trait ParentReconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError>;
}
