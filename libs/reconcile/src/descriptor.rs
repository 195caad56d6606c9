//! Parent and child descriptor traits.

use std::collections::BTreeMap;

use cellmesh_events::ObjectRef;
use serde_json::Value;

use crate::error::ReconcileError;
use crate::fields::FieldSet;
use crate::object::{Object, OwnerLink, ResourceKind};
use crate::store::Propagation;

/// Ordering bucket of a child kind within a pass.
///
/// Later stages depend on names and selectors fixed by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Services and network policies.
    Network,
    /// Configuration, secrets and storage.
    Config,
    /// Workloads and nested mesh parents.
    Workload,
    /// Autoscalers.
    Scaling,
    /// Traffic routing rules.
    Routing,
}

/// How an owned child whose content drifted is brought back in line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStrategy {
    /// Overwrite the mutable fields with a conditional update.
    #[default]
    InPlace,
    /// Delete the child; the next pass creates it again.
    Recreate,
}

/// Desired content of a child, without identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Desired {
    /// Labels managed by the controller.
    pub labels: BTreeMap<String, String>,

    /// Annotations managed by the controller.
    pub annotations: BTreeMap<String, String>,

    /// Body content (e.g. `{"spec": ...}`).
    pub body: Value,
}

impl Desired {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// The parent side of a reconcile: identity plus status bookkeeping.
pub trait Parent: Send + Sync {
    /// Owner link every child of this parent carries.
    fn owner_link(&self) -> OwnerLink;

    fn namespace(&self) -> &str;

    fn name(&self) -> &str;

    /// Current generation of the parent.
    fn generation(&self) -> i64;

    /// Generation of the last fully successful pass.
    fn observed_generation(&self) -> i64;

    /// Last recorded generation of the child under `key`.
    fn child_generation(&self, key: &str) -> Option<i64>;

    fn set_child_generation(&mut self, key: &str, generation: i64);

    fn clear_child_generation(&mut self, key: &str);

    /// Object events about this parent are attached to.
    fn event_target(&self) -> ObjectRef;
}

/// Per-kind knowledge about one child of a parent.
///
/// Descriptors are pure: the same parent always yields the same name and
/// the same desired content.
pub trait ChildDescriptor<P: Parent>: Send + Sync {
    /// Kind of the child.
    fn kind(&self) -> ResourceKind;

    /// Stage the child is reconciled in.
    fn stage(&self) -> Stage;

    /// Deterministic child name.
    fn name(&self, parent: &P) -> String;

    /// Status bookkeeping key; multi-instance children override this with
    /// [`instance_key`].
    fn generation_key(&self, parent: &P) -> String {
        let _ = parent;
        self.kind().label().to_string()
    }

    /// Whether the child should exist.
    fn required(&self, parent: &P) -> bool;

    /// Desired content. Only called when the child is required.
    fn build(&self, parent: &P) -> Result<Desired, ReconcileError>;

    /// Body fields owned by the controller after creation.
    fn mutable_fields(&self) -> FieldSet;

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::InPlace
    }

    fn propagation(&self) -> Propagation {
        Propagation::Background
    }

    /// Copy status-relevant fields of the live child onto the parent.
    fn observe(&self, parent: &mut P, child: &Object) {
        let _ = (parent, child);
    }

    /// Clear status fields referencing the child.
    fn forget(&self, parent: &mut P) {
        let _ = parent;
    }
}

/// Status bookkeeping key of a multi-instance child: `Kind/name`.
pub fn instance_key(kind: ResourceKind, name: &str) -> String {
    format!("{}/{}", kind.label(), name)
}
