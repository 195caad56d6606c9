//! The per-parent reconcile pass.

use std::sync::Arc;

use async_trait::async_trait;
use cellmesh_events::{reasons, Event, EventRecorder, ObjectRef};
use cellmesh_reconcile::{
    ChildDescriptor, Desired, ErrorAggregator, FieldSet, KindReconciler, Object, ObjectKey, Parent,
    ReconcileError, ResourceKind, Stage, Store, StoreError,
};
use tracing::{debug, info, instrument, warn};

use super::{Children, ParentController, ParentReconciler};
use crate::model::{
    condition_types, parse_dependencies, AggregateState, ConditionStatus, DependencyKind,
    ParentInstance, CELL_DEPENDENCIES_ANNOTATION, COMPOSITE_DEPENDENCIES_ANNOTATION,
};
use crate::routing::{resolve_dependencies, Caller, RoutingChild, RoutingRule};
use crate::state::{MeshState, SharedMeshState};

/// Runs reconcile passes for one parent kind.
pub struct Orchestrator<C> {
    controller: C,
    store: Arc<dyn Store>,
    recorder: Arc<dyn EventRecorder>,
    state: SharedMeshState,
}

impl<C: ParentController> Orchestrator<C> {
    pub fn new(
        controller: C,
        store: Arc<dyn Store>,
        recorder: Arc<dyn EventRecorder>,
        state: impl Into<SharedMeshState>,
    ) -> Self {
        Self {
            controller,
            store,
            recorder,
            state: state.into(),
        }
    }

    /// Run one pass over the parent stored under `key`.
    ///
    /// Every child kind is attempted. Status is written once at the end, and
    /// only if it changed; the aggregate of all child failures is returned.
    #[instrument(skip_all, fields(kind = %C::KIND, parent = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(object) = self.store.get(C::KIND, &key.namespace, &key.name).await? else {
            debug!("Parent no longer exists");
            return Ok(());
        };

        let mut parent = match ParentInstance::<C::Spec>::from_object(&object) {
            Ok(parent) => parent,
            Err(e) => {
                warn!(error = %e, "Parent spec is invalid");
                self.recorder.record(
                    &object_ref(&object),
                    Event::warning(reasons::INVALID_SPEC, e.to_string()),
                );
                return Err(e);
            }
        };
        let last_status = parent.status.clone();
        let mut agg = ErrorAggregator::new();
        let mesh = self.state.snapshot();

        let mut children = self.controller.children(&parent, &mesh);
        if let Some(caller) = self.controller.caller(&parent) {
            match self.routing_rule(&parent, &caller, &mesh).await {
                Ok(rule) => children.push(Box::new(RoutingChild::new(caller, rule))),
                Err(e) => agg.push_failure(ResourceKind::VirtualService.label(), e),
            }
        }
        let stale = stale_children(&parent, &children);
        children.extend(stale);
        children.sort_by_key(|child| child.stage());

        let reconciler = KindReconciler::new(self.store.as_ref(), self.recorder.as_ref());
        for child in &children {
            let child_key = child.generation_key(&parent);
            let result = reconciler.reconcile(&mut parent, child.as_ref()).await;
            agg.record(child_key, result);
        }

        let target = parent.event_target();
        if agg.is_empty() {
            let advanced = parent.status.observed_generation != parent.meta.generation;
            parent.status.observed_generation = parent.meta.generation;

            let state = self.controller.aggregate(&mut parent);
            parent.status.status = state;
            parent.status.set_condition(
                condition_types::SYNCED,
                ConditionStatus::True,
                Some(reasons::SYNCED),
                None,
            );
            parent
                .status
                .set_condition(condition_types::READY, state.is_ready().into(), None, None);

            if advanced {
                info!(generation = parent.meta.generation, state = ?state, "Parent synced");
                self.recorder.record(
                    &target,
                    Event::normal(
                        reasons::SYNCED,
                        format!("{} synced at generation {}", C::KIND, parent.meta.generation),
                    ),
                );
            }
        } else {
            let summary = agg.summary();
            self.controller.aggregate(&mut parent);
            parent.status.status = AggregateState::NotReady;
            parent.status.set_condition(
                condition_types::SYNCED,
                ConditionStatus::False,
                Some(reasons::SYNC_FAILED),
                Some(summary.clone()),
            );
            parent.status.set_condition(
                condition_types::READY,
                ConditionStatus::False,
                None,
                None,
            );
            warn!(failures = %summary, "Parent sync failed");
            self.recorder
                .record(&target, Event::warning(reasons::SYNC_FAILED, summary));
        }

        let persisted = if parent.status != last_status {
            self.persist_status(&object, &parent).await
        } else {
            Ok(())
        };

        agg.into_result()?;
        persisted.map_err(ReconcileError::from)
    }

    /// Resolve and compile the parent's dependency routing rule.
    async fn routing_rule(
        &self,
        parent: &ParentInstance<C::Spec>,
        caller: &Caller,
        mesh: &MeshState,
    ) -> Result<RoutingRule, ReconcileError> {
        let annotation = match caller.kind {
            DependencyKind::Cell => CELL_DEPENDENCIES_ANNOTATION,
            DependencyKind::Composite => COMPOSITE_DEPENDENCIES_ANNOTATION,
        };
        let dependencies = parse_dependencies(&parent.meta.annotations, annotation)?;
        let resolved = resolve_dependencies(
            parent.namespace(),
            &dependencies,
            self.store.as_ref(),
            self.recorder.as_ref(),
            &parent.event_target(),
        )
        .await?;
        Ok(mesh.routing().compile(caller, &resolved))
    }

    async fn persist_status(
        &self,
        object: &Object,
        parent: &ParentInstance<C::Spec>,
    ) -> Result<(), StoreError> {
        let mut updated = object.clone();
        updated.status = parent.status_value();

        match self.store.update_status(&updated).await {
            Ok(_) => {
                debug!("Status updated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to update status");
                self.recorder.record(
                    &parent.event_target(),
                    Event::warning(
                        reasons::STATUS_UPDATE_FAILED,
                        format!("Failed to update status: {e}"),
                    ),
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: ParentController> ParentReconciler for Orchestrator<C> {
    fn kind(&self) -> ResourceKind {
        C::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        Orchestrator::reconcile(self, key).await
    }
}

fn object_ref(object: &Object) -> ObjectRef {
    ObjectRef {
        api_version: object.kind.api_version(),
        kind: object.kind.kind().to_string(),
        namespace: object.meta.namespace.clone(),
        name: object.meta.name.clone(),
        uid: object.meta.uid.clone(),
    }
}

// =============================================================================
// Stale multi-instance children
// =============================================================================

/// Descriptors deleting multi-instance children whose template left the parent spec.
///
/// Such children are only known through their `Kind/name` bookkeeping key in
/// the parent status; nothing in the current spec names them anymore.
fn stale_children<S: Send + Sync + 'static>(
    parent: &ParentInstance<S>,
    children: &Children<S>,
) -> Children<S> {
    let current: Vec<String> = children.iter().map(|c| c.generation_key(parent)).collect();

    parent
        .status
        .generations
        .keys()
        .filter(|key| !current.contains(key))
        .filter_map(|key| {
            let (label, name) = key.split_once('/')?;
            let kind = ResourceKind::ALL.into_iter().find(|k| k.label() == label)?;
            Some(Box::new(StaleChild {
                kind,
                name: name.to_string(),
                key: key.clone(),
            }) as Box<dyn ChildDescriptor<ParentInstance<S>>>)
        })
        .collect()
}

struct StaleChild {
    kind: ResourceKind,
    name: String,
    key: String,
}

impl<P: Parent> ChildDescriptor<P> for StaleChild {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn stage(&self) -> Stage {
        match self.kind {
            ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::PersistentVolumeClaim => {
                Stage::Config
            }
            _ => Stage::Workload,
        }
    }

    fn name(&self, _parent: &P) -> String {
        self.name.clone()
    }

    fn generation_key(&self, _parent: &P) -> String {
        self.key.clone()
    }

    fn required(&self, _parent: &P) -> bool {
        false
    }

    fn build(&self, _parent: &P) -> Result<Desired, ReconcileError> {
        Err(ReconcileError::InvalidSpec(format!(
            "{} {} is no longer declared",
            self.kind, self.name
        )))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::empty()
    }
}
