//! Children shared by Cells and Composites.
//!
//! Both instance kinds own a signing Secret, a TokenService and one Component
//! per component template. The instance label (`cell` or `composite`) ties
//! all of them, and all pods below them, to the instance.

use std::collections::BTreeMap;

use cellmesh_reconcile::{
    instance_key, ChildDescriptor, Desired, FieldSet, Object, ReconcileError, ResourceKind, Stage,
};
use serde_json::json;

use super::labels_with;
use crate::config::MeshSecret;
use crate::model::{
    AggregateState, CellSpec, ComponentTemplate, CompositeSpec, ParentInstance, TokenServiceSpec,
    TokenServiceTemplate,
};
use crate::naming::{self, labels};

/// Spec of an instance kind.
pub trait InstanceSpec: Send + Sync {
    fn components(&self) -> &[ComponentTemplate];

    fn sts(&self) -> &TokenServiceTemplate;
}

impl InstanceSpec for CellSpec {
    fn components(&self) -> &[ComponentTemplate] {
        &self.components
    }

    fn sts(&self) -> &TokenServiceTemplate {
        &self.sts
    }
}

impl InstanceSpec for CompositeSpec {
    fn components(&self) -> &[ComponentTemplate] {
        &self.components
    }

    fn sts(&self) -> &TokenServiceTemplate {
        &self.sts
    }
}

/// Label key identifying the instance's own objects.
pub fn instance_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Composite => labels::COMPOSITE,
        _ => labels::CELL,
    }
}

/// The instance's labels plus its identity label.
pub fn instance_labels<S>(instance: &ParentInstance<S>) -> BTreeMap<String, String> {
    labels_with(instance, instance_label(instance.kind), instance.name())
}

/// Shared children: secret, token service and one Component per template.
pub fn children<S: InstanceSpec>(
    instance: &ParentInstance<S>,
    secret: Option<&MeshSecret>,
) -> Vec<Box<dyn ChildDescriptor<ParentInstance<S>>>> {
    let mut children: Vec<Box<dyn ChildDescriptor<ParentInstance<S>>>> = vec![
        Box::new(SecretChild(secret.cloned())),
        Box::new(TokenServiceChild),
    ];
    children.extend(
        instance
            .spec
            .components()
            .iter()
            .cloned()
            .map(|t| Box::new(ComponentChild(t)) as Box<dyn ChildDescriptor<ParentInstance<S>>>),
    );
    children
}

/// Recount component readiness against the current templates.
///
/// Entries for templates no longer in the parent spec are dropped. Returns whether
/// every component is ready.
pub fn count_components<S: InstanceSpec>(instance: &mut ParentInstance<S>) -> bool {
    let names: Vec<String> = instance
        .spec
        .components()
        .iter()
        .map(|t| t.metadata.name.clone())
        .collect();
    instance
        .status
        .component_statuses
        .retain(|name, _| names.contains(name));

    let active = names
        .iter()
        .filter(|name| {
            instance
                .status
                .component_statuses
                .get(name.as_str())
                .is_some_and(AggregateState::is_ready)
        })
        .count();

    instance.status.component_count = Some(names.len() as i64);
    instance.status.active_component_count = Some(active as i64);
    active == names.len()
}

/// Aggregate state a nested parent reports in its own status.
pub(crate) fn nested_state(child: &Object) -> AggregateState {
    child
        .status_field("/status")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

// =============================================================================
// Config
// =============================================================================

/// Copy of the mesh signing bundle, required only when the mesh has one.
struct SecretChild(Option<MeshSecret>);

impl<S: InstanceSpec> ChildDescriptor<ParentInstance<S>> for SecretChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Secret
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &ParentInstance<S>) -> String {
        naming::instance_secret(parent.name())
    }

    fn required(&self, _parent: &ParentInstance<S>) -> bool {
        self.0.is_some()
    }

    fn build(&self, parent: &ParentInstance<S>) -> Result<Desired, ReconcileError> {
        let Some(secret) = &self.0 else {
            return Err(ReconcileError::InvalidSpec("mesh secret is not loaded".to_string()));
        };
        Ok(Desired::new(json!({"type": "Opaque", "data": secret.data()}))
            .with_labels(instance_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/data"])
    }
}

// =============================================================================
// Workload
// =============================================================================

struct TokenServiceChild;

impl<S: InstanceSpec> ChildDescriptor<ParentInstance<S>> for TokenServiceChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TokenService
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &ParentInstance<S>) -> String {
        naming::token_service(parent.name())
    }

    fn required(&self, _parent: &ParentInstance<S>) -> bool {
        true
    }

    fn build(&self, parent: &ParentInstance<S>) -> Result<Desired, ReconcileError> {
        let template = parent.spec.sts();
        let spec = TokenServiceSpec {
            selector: BTreeMap::from([(
                instance_label(parent.kind).to_string(),
                parent.name().to_string(),
            )]),
            instance_name: parent.name().to_string(),
            intercept_mode: template.intercept_mode,
            opa: template.opa.clone(),
            composite: parent.kind == ResourceKind::Composite,
        };

        Ok(Desired::new(json!({"spec": spec})).with_labels(instance_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

/// A component template materialized as a Component parent.
struct ComponentChild(ComponentTemplate);

impl<S: InstanceSpec> ChildDescriptor<ParentInstance<S>> for ComponentChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Component
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &ParentInstance<S>) -> String {
        naming::instance_child(parent.name(), &self.0.metadata.name)
    }

    fn generation_key(&self, parent: &ParentInstance<S>) -> String {
        instance_key(<Self as ChildDescriptor<ParentInstance<S>>>::kind(self), &self.name(parent))
    }

    fn required(&self, _parent: &ParentInstance<S>) -> bool {
        true
    }

    fn build(&self, parent: &ParentInstance<S>) -> Result<Desired, ReconcileError> {
        let template = &self.0.metadata.name;
        if parent.kind == ResourceKind::Cell
            && naming::RESERVED_COMPONENT_NAMES.contains(&template.as_str())
        {
            return Err(ReconcileError::InvalidSpec(format!(
                "component name {template} is reserved in cell {}",
                parent.name()
            )));
        }

        let mut labels = instance_labels(parent);
        labels.extend(self.0.metadata.labels.clone());
        let mut desired = Desired::new(json!({"spec": self.0.spec})).with_labels(labels);
        desired.annotations = self.0.metadata.annotations.clone();
        Ok(desired)
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }

    fn observe(&self, parent: &mut ParentInstance<S>, child: &Object) {
        parent
            .status
            .component_statuses
            .insert(self.0.metadata.name.clone(), nested_state(child));
    }

    fn forget(&self, parent: &mut ParentInstance<S>) {
        parent.status.component_statuses.remove(&self.0.metadata.name);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::model::{Cell, Composite};

    fn cell(spec: Value) -> Cell {
        let object = Object::new(ResourceKind::Cell, "default", "hr").with_body(json!({"spec": spec}));
        Cell::from_object(&object).unwrap()
    }

    fn composite(spec: Value) -> Composite {
        let object =
            Object::new(ResourceKind::Composite, "default", "stock").with_body(json!({"spec": spec}));
        Composite::from_object(&object).unwrap()
    }

    fn secret() -> MeshSecret {
        MeshSecret {
            key_pem: "a2V5".to_string(),
            cert_pem: "Y2VydA==".to_string(),
            ca_chain_pem: "Y2E=".to_string(),
        }
    }

    #[test]
    fn test_secret_follows_mesh_secret() {
        let c = cell(json!({}));
        let without = children(&c, None);
        assert!(!without[0].required(&c));

        let with = children(&c, Some(&secret()));
        assert!(with[0].required(&c));
        let desired = with[0].build(&c).unwrap();
        assert_eq!(desired.body["data"]["key.pem"], "a2V5");
        assert_eq!(with[0].name(&c), "hr--secret");
    }

    #[test]
    fn test_token_service_spec() {
        let c = composite(json!({"sts": {"interceptMode": "Outbound"}}));
        let desired = children(&c, None)[1].build(&c).unwrap();
        assert_eq!(
            desired.body["spec"],
            json!({
                "selector": {"mesh.cellery.io/composite": "stock"},
                "instanceName": "stock",
                "interceptMode": "Outbound",
                "composite": true
            })
        );
        assert_eq!(desired.labels["mesh.cellery.io/composite"], "stock");
    }

    #[test]
    fn test_component_children() {
        let c = cell(json!({"components": [
            {"metadata": {"name": "employee", "labels": {"team": "hr"}}, "spec": {"ports": [{"port": 80, "targetPort": 8080}]}}
        ]}));
        let children = children(&c, None);
        let component = &children[2];

        assert_eq!(component.name(&c), "hr--employee");
        assert_eq!(component.generation_key(&c), "Component/hr--employee");
        let desired = component.build(&c).unwrap();
        assert_eq!(desired.labels["team"], "hr");
        assert_eq!(desired.labels["mesh.cellery.io/cell"], "hr");
        assert_eq!(desired.body["spec"]["ports"][0]["port"], 80);
    }

    #[test]
    fn test_reserved_component_names_rejected_in_cells() {
        let c = cell(json!({"components": [{"metadata": {"name": "gateway"}}]}));
        let children = children(&c, None);
        assert!(matches!(
            children[2].build(&c),
            Err(ReconcileError::InvalidSpec(_))
        ));

        let comp = composite(json!({"components": [{"metadata": {"name": "gateway"}}]}));
        let children = super::children(&comp, None);
        assert!(children[2].build(&comp).is_ok());
    }

    #[test]
    fn test_component_status_observed() {
        let mut c = cell(json!({"components": [{"metadata": {"name": "employee"}}]}));
        let children = children(&c, None);

        let mut child = Object::new(ResourceKind::Component, "default", "hr--employee");
        child.status = json!({"status": "Ready"});
        children[2].observe(&mut c, &child);
        assert_eq!(c.status.component_statuses["employee"], AggregateState::Ready);

        children[2].forget(&mut c);
        assert!(c.status.component_statuses.is_empty());
    }

    #[test]
    fn test_count_components_prunes_removed_templates() {
        let mut c = cell(json!({"components": [
            {"metadata": {"name": "a"}},
            {"metadata": {"name": "b"}}
        ]}));
        c.status
            .component_statuses
            .insert("a".to_string(), AggregateState::Ready);
        c.status
            .component_statuses
            .insert("gone".to_string(), AggregateState::Ready);

        assert!(!count_components(&mut c));
        assert_eq!(c.status.component_count, Some(2));
        assert_eq!(c.status.active_component_count, Some(1));
        assert!(!c.status.component_statuses.contains_key("gone"));

        c.status
            .component_statuses
            .insert("b".to_string(), AggregateState::Ready);
        assert!(count_components(&mut c));
    }
}
