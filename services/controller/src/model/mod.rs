//! Typed view of the mesh parent kinds.

mod dependency;
mod spec;
mod status;

use cellmesh_events::ObjectRef;
use cellmesh_reconcile::{Object, ObjectMeta, OwnerLink, Parent, ReconcileError, ResourceKind};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use dependency::{
    parse_dependencies, Dependency, DependencyKind, CELL_DEPENDENCIES_ANNOTATION,
    COMPOSITE_DEPENDENCIES_ANNOTATION,
};
pub use spec::*;
pub use status::{condition_types, AggregateState, Condition, ConditionStatus, ParentStatus};

pub type Cell = ParentInstance<CellSpec>;
pub type Composite = ParentInstance<CompositeSpec>;
pub type Component = ParentInstance<ComponentSpec>;
pub type Gateway = ParentInstance<GatewaySpec>;
pub type TokenService = ParentInstance<TokenServiceSpec>;

/// A parent object with its spec and status parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentInstance<S> {
    pub kind: ResourceKind,
    pub meta: ObjectMeta,
    pub spec: S,
    pub status: ParentStatus,
}

impl<S: DeserializeOwned> ParentInstance<S> {
    /// Parse a stored parent object. A spec that does not parse is
    /// `InvalidSpec`; a status that does not parse starts over empty.
    pub fn from_object(object: &Object) -> Result<Self, ReconcileError> {
        let raw_spec = object.body.get("spec").cloned().unwrap_or(Value::Null);
        let raw_spec = if raw_spec.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            raw_spec
        };
        let spec = serde_json::from_value(raw_spec).map_err(|e| {
            ReconcileError::InvalidSpec(format!("{} {}: {}", object.kind, object.key(), e))
        })?;

        let status = if object.status.is_null() {
            ParentStatus::default()
        } else {
            serde_json::from_value(object.status.clone()).unwrap_or_else(|e| {
                tracing::warn!(object = %object.key(), error = %e, "Discarding unreadable status");
                ParentStatus::default()
            })
        };

        Ok(Self {
            kind: object.kind,
            meta: object.meta.clone(),
            spec,
            status,
        })
    }
}

impl<S> ParentInstance<S> {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    /// Serialized status.
    pub fn status_value(&self) -> Value {
        serde_json::to_value(&self.status).unwrap_or(Value::Null)
    }
}

impl<S: Send + Sync> Parent for ParentInstance<S> {
    fn owner_link(&self) -> OwnerLink {
        OwnerLink {
            kind: self.kind,
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
        }
    }

    fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn generation(&self) -> i64 {
        self.meta.generation
    }

    fn observed_generation(&self) -> i64 {
        self.status.observed_generation
    }

    fn child_generation(&self, key: &str) -> Option<i64> {
        self.status.generations.get(key).copied()
    }

    fn set_child_generation(&mut self, key: &str, generation: i64) {
        self.status.generations.insert(key.to_string(), generation);
    }

    fn clear_child_generation(&mut self, key: &str) {
        self.status.generations.remove(key);
    }

    fn event_target(&self) -> ObjectRef {
        ObjectRef {
            api_version: self.kind.api_version(),
            kind: self.kind.kind().to_string(),
            namespace: self.meta.namespace.clone(),
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_object_parses_spec_and_status() {
        let mut object = Object::new(ResourceKind::Component, "default", "employee").with_body(json!({
            "spec": {"type": "Job", "template": {"containers": []}}
        }));
        object.meta.generation = 4;
        object.status = json!({"observedGeneration": 3, "status": "Ready"});

        let component = Component::from_object(&object).unwrap();
        assert_eq!(component.spec.workload_type, WorkloadType::Job);
        assert_eq!(component.status.observed_generation, 3);
        assert_eq!(component.generation(), 4);
    }

    #[test]
    fn test_missing_spec_is_default() {
        let object = Object::new(ResourceKind::Composite, "default", "stock");
        let composite = Composite::from_object(&object).unwrap();
        assert!(composite.spec.components.is_empty());
        assert_eq!(composite.status, ParentStatus::default());
    }

    #[test]
    fn test_malformed_spec_is_invalid() {
        let object = Object::new(ResourceKind::Component, "default", "employee")
            .with_body(json!({"spec": {"type": "CronJob"}}));
        let err = Component::from_object(&object).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    }

    #[test]
    fn test_event_target_uses_wire_kind() {
        let mut object = Object::new(ResourceKind::Gateway, "default", "hr--gateway");
        object.meta.uid = "uid-1".to_string();
        let gateway = Gateway::from_object(&object).unwrap();
        let target = gateway.event_target();
        assert_eq!(target.kind, "Gateway");
        assert_eq!(target.api_version, "mesh.cellery.io/v1alpha2");
        assert_eq!(target.uid, "uid-1");
    }
}
