//! The per-kind reconcile protocol.
//!
//! One [`KindReconciler`] drives any [`ChildDescriptor`] through the same
//! fixed steps:
//!
//! 1. Get the child by its deterministic name.
//! 2. If the child is not required, delete it when owned and clear status.
//! 3. If required and absent, create it.
//! 4. If present and not owned, fail permanently.
//! 5. If owned and either side changed since the last recorded write, merge
//!    the mutable fields into the live object and write it back when the
//!    merge changed anything.
//! 6. Copy the resulting object's generation and observed fields onto the
//!    parent status.
//!
//! An owned child that is already terminating is treated as gone: it is not
//! deleted again, and it is recreated once the store has removed it.

use cellmesh_events::{reasons, Event, EventRecorder};
use tracing::{debug, info, instrument, warn};

use crate::descriptor::{ChildDescriptor, Parent, UpdateStrategy};
use crate::error::ReconcileError;
use crate::object::{Object, ObjectMeta};
use crate::store::{Store, StoreError};

/// What a reconcile did to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    /// Not required and not present.
    Absent,
    /// Not required, present but not owned; left untouched.
    Skipped,
    /// Created.
    Created,
    /// Present and already matching; no write issued.
    Unchanged,
    /// Updated in place.
    Updated,
    /// Deleted because it is no longer required.
    Deleted,
    /// Deleted so the next pass recreates it with new content.
    Recreating,
    /// Owned and terminating; waiting for the store to remove it.
    Terminating,
}

impl ChildOutcome {
    /// Returns true if a write was issued.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Deleted | Self::Recreating
        )
    }
}

/// Drives child descriptors against the store.
pub struct KindReconciler<'a> {
    store: &'a dyn Store,
    recorder: &'a dyn EventRecorder,
}

impl<'a> KindReconciler<'a> {
    pub fn new(store: &'a dyn Store, recorder: &'a dyn EventRecorder) -> Self {
        Self { store, recorder }
    }

    /// Reconcile one child of `parent`.
    #[instrument(
        skip_all,
        fields(parent = %parent.name(), namespace = %parent.namespace(), kind = %child.kind())
    )]
    pub async fn reconcile<P: Parent>(
        &self,
        parent: &mut P,
        child: &dyn ChildDescriptor<P>,
    ) -> Result<ChildOutcome, ReconcileError> {
        let kind = child.kind();
        let name = child.name(parent);
        let key = child.generation_key(parent);

        let existing = self.store.get(kind, parent.namespace(), &name).await?;

        if !child.required(parent) {
            return self.remove(parent, child, existing, &key).await;
        }

        let Some(existing) = existing else {
            return self.create(parent, child, &name, &key).await;
        };

        if !existing.is_owned_by(&parent.owner_link()) {
            self.recorder.record(
                &parent.event_target(),
                Event::warning(
                    reasons::NOT_OWNED,
                    format!("{} {} already exists and is not managed by {}", kind, name, parent.name()),
                ),
            );
            warn!(child = %name, "Child exists and is not owned");
            return Err(ReconcileError::NotOwned {
                kind,
                namespace: parent.namespace().to_string(),
                name,
            });
        }

        if existing.is_terminating() {
            return Ok(self.terminating(parent, child, &existing, &key));
        }

        let stale = parent.generation() != parent.observed_generation()
            || parent.child_generation(&key) != Some(existing.meta.generation);
        if !stale {
            child.observe(parent, &existing);
            return Ok(ChildOutcome::Unchanged);
        }

        self.update(parent, child, &name, &key).await
    }

    async fn remove<P: Parent>(
        &self,
        parent: &mut P,
        child: &dyn ChildDescriptor<P>,
        existing: Option<Object>,
        key: &str,
    ) -> Result<ChildOutcome, ReconcileError> {
        parent.clear_child_generation(key);
        child.forget(parent);

        let Some(existing) = existing else {
            return Ok(ChildOutcome::Absent);
        };
        if !existing.is_owned_by(&parent.owner_link()) {
            debug!(child = %existing.name(), "Leaving unowned child that is no longer required");
            return Ok(ChildOutcome::Skipped);
        }
        if existing.is_terminating() {
            debug!(child = %existing.name(), "Child is already terminating");
            return Ok(ChildOutcome::Terminating);
        }

        self.delete(parent, child, &existing, reasons::DELETED).await?;
        Ok(ChildOutcome::Deleted)
    }

    async fn create<P: Parent>(
        &self,
        parent: &mut P,
        child: &dyn ChildDescriptor<P>,
        name: &str,
        key: &str,
    ) -> Result<ChildOutcome, ReconcileError> {
        let kind = child.kind();
        let desired = child.build(parent)?;

        let object = Object {
            kind,
            meta: ObjectMeta {
                name: name.to_string(),
                namespace: parent.namespace().to_string(),
                labels: desired.labels,
                annotations: desired.annotations,
                owner: Some(parent.owner_link()),
                ..ObjectMeta::default()
            },
            body: desired.body,
            status: serde_json::Value::Null,
        };

        let created = match self.store.create(&object).await {
            Ok(created) => created,
            Err(e) => return Err(self.failed(parent, reasons::CREATE_FAILED, "create", &object, e)),
        };

        info!(child = %name, generation = created.meta.generation, "Created child");
        self.recorder.record(
            &parent.event_target(),
            Event::normal(reasons::CREATED, format!("Created {} {}", kind, name)),
        );

        parent.set_child_generation(key, created.meta.generation);
        child.observe(parent, &created);
        Ok(ChildOutcome::Created)
    }

    async fn update<P: Parent>(
        &self,
        parent: &mut P,
        child: &dyn ChildDescriptor<P>,
        name: &str,
        key: &str,
    ) -> Result<ChildOutcome, ReconcileError> {
        let kind = child.kind();

        // Merge against a fresh read, never the one the decision was made on.
        let Some(live) = self.store.get(kind, parent.namespace(), name).await? else {
            return self.create(parent, child, name, key).await;
        };
        if live.is_terminating() {
            return Ok(self.terminating(parent, child, &live, key));
        }

        let desired = child.build(parent)?;
        let mut merged = live.clone();
        merged.body = child.mutable_fields().apply(&desired.body, &live.body);
        merged.meta.labels.extend(desired.labels);
        merged.meta.annotations.extend(desired.annotations);

        if merged == live {
            debug!(child = %name, "Child already matches desired content");
            parent.set_child_generation(key, live.meta.generation);
            child.observe(parent, &live);
            return Ok(ChildOutcome::Unchanged);
        }

        if child.update_strategy() == UpdateStrategy::Recreate {
            parent.clear_child_generation(key);
            child.forget(parent);
            self.delete(parent, child, &live, reasons::RECREATING).await?;
            return Ok(ChildOutcome::Recreating);
        }

        let updated = match self.store.update(&merged).await {
            Ok(updated) => updated,
            Err(e) => return Err(self.failed(parent, reasons::UPDATE_FAILED, "update", &merged, e)),
        };

        info!(child = %name, generation = updated.meta.generation, "Updated child");
        self.recorder.record(
            &parent.event_target(),
            Event::normal(reasons::UPDATED, format!("Updated {} {}", kind, name)),
        );

        parent.set_child_generation(key, updated.meta.generation);
        child.observe(parent, &updated);
        Ok(ChildOutcome::Updated)
    }

    fn terminating<P: Parent>(
        &self,
        parent: &mut P,
        child: &dyn ChildDescriptor<P>,
        existing: &Object,
        key: &str,
    ) -> ChildOutcome {
        debug!(child = %existing.name(), "Waiting for terminating child to be removed");
        parent.clear_child_generation(key);
        child.forget(parent);
        ChildOutcome::Terminating
    }

    async fn delete<P: Parent>(
        &self,
        parent: &P,
        child: &dyn ChildDescriptor<P>,
        existing: &Object,
        reason: &str,
    ) -> Result<(), ReconcileError> {
        let kind = child.kind();
        let propagation = child.propagation();

        match self
            .store
            .delete(kind, existing.namespace(), existing.name(), propagation)
            .await
        {
            Ok(()) => {}
            // Someone else got there first.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(self.failed(parent, reasons::DELETE_FAILED, "delete", existing, e)),
        }

        info!(child = %existing.name(), propagation = propagation.as_str(), "Deleted child");
        self.recorder.record(
            &parent.event_target(),
            Event::normal(reason, format!("Deleted {} {}", kind, existing.name())),
        );
        Ok(())
    }

    fn failed<P: Parent>(
        &self,
        parent: &P,
        reason: &str,
        verb: &str,
        object: &Object,
        error: StoreError,
    ) -> ReconcileError {
        warn!(child = %object.name(), error = %error, "Failed to {} child", verb);
        self.recorder.record(
            &parent.event_target(),
            Event::warning(
                reason,
                format!("Failed to {} {} {}: {}", verb, object.kind, object.name(), error),
            ),
        );
        error.into()
    }
}
