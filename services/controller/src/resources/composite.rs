//! Children of a Composite: the instance children only.

use cellmesh_reconcile::ChildDescriptor;

use super::instance;
use crate::model::{AggregateState, Composite};
use crate::state::MeshState;

/// Every child a composite may have, required or not. The routing rule is
/// added by the orchestrator.
pub fn children(composite: &Composite, state: &MeshState) -> Vec<Box<dyn ChildDescriptor<Composite>>> {
    instance::children(composite, state.secret())
}

/// Ready iff every component is ready.
pub fn aggregate(composite: &mut Composite) -> AggregateState {
    AggregateState::from_ready(instance::count_components(composite))
}
