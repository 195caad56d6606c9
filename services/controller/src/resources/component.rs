//! Children of a Component.

use std::collections::BTreeMap;

use cellmesh_reconcile::{
    instance_key, ChildDescriptor, ContentHash, Desired, FieldSet, Object, Propagation,
    ReconcileError, ResourceKind, Stage, UpdateStrategy,
};
use serde_json::{json, Map, Value};

use super::pod::component_pod_spec;
use super::{base64_encode, labels_with};
use crate::model::{
    AggregateState, ClaimTemplate, Component, ComponentSpec, Configuration, SecretTemplate,
    TemplateMeta, WorkloadType,
};
use crate::naming::{self, annotations, labels};

const SECRET_TYPE_OPAQUE: &str = "Opaque";
const JOB_RESTART_POLICY: &str = "Never";

/// Knative autoscaling annotations.
mod autoscaling {
    pub const CLASS: &str = "autoscaling.knative.dev/class";
    pub const KPA_CLASS: &str = "kpa.autoscaling.knative.dev";
    pub const MIN_SCALE: &str = "autoscaling.knative.dev/minScale";
    pub const MAX_SCALE: &str = "autoscaling.knative.dev/maxScale";
    pub const TARGET: &str = "autoscaling.knative.dev/target";
    pub const TARGET_UTILIZATION: &str = "autoscaling.knative.dev/targetUtilizationPercentage";
}

/// The workload kind whose readiness decides the component's readiness.
pub fn primary_workload(spec: &ComponentSpec) -> ResourceKind {
    match spec.workload_type {
        WorkloadType::Job => ResourceKind::Job,
        WorkloadType::StatefulSet => ResourceKind::StatefulSet,
        WorkloadType::Deployment if spec.kpa().is_some() => ResourceKind::ServingConfiguration,
        WorkloadType::Deployment => ResourceKind::Deployment,
    }
}

/// Every child a component may have, required or not.
pub fn children(component: &Component) -> Vec<Box<dyn ChildDescriptor<Component>>> {
    let autoscaled = component.spec.hpa().is_some();

    let mut children: Vec<Box<dyn ChildDescriptor<Component>>> = vec![Box::new(ServiceChild)];
    children.extend(
        component
            .spec
            .configurations
            .iter()
            .cloned()
            .map(|c| Box::new(ConfigMapChild(c)) as Box<dyn ChildDescriptor<Component>>),
    );
    children.extend(
        component
            .spec
            .secrets
            .iter()
            .cloned()
            .map(|s| Box::new(SecretChild(s)) as Box<dyn ChildDescriptor<Component>>),
    );
    children.extend(
        component
            .spec
            .volume_claims
            .iter()
            .filter(|c| c.shared)
            .map(|c| Box::new(ClaimChild(c.template.clone())) as Box<dyn ChildDescriptor<Component>>),
    );
    children.push(Box::new(DeploymentChild { autoscaled }));
    children.push(Box::new(StatefulSetChild { autoscaled }));
    children.push(Box::new(JobChild));
    children.push(Box::new(ServingChild));
    children.push(Box::new(AutoscalerChild));
    children
}

/// Ready iff the primary workload reports at least one running replica.
pub fn aggregate(component: &Component) -> AggregateState {
    let ready = match primary_workload(&component.spec) {
        ResourceKind::ServingConfiguration => component.status.serving_ready == Some(true),
        _ => component.status.available_replicas.unwrap_or(0) >= 1,
    };
    AggregateState::from_ready(ready)
}

fn selector(component: &Component) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::COMPONENT.to_string(), component.name().to_string())])
}

fn pod_labels(component: &Component) -> BTreeMap<String, String> {
    labels_with(component, labels::COMPONENT, component.name())
}

fn pod_template(component: &Component) -> Value {
    json!({
        "metadata": {"labels": pod_labels(component)},
        "spec": component_pod_spec(component.name(), &component.spec),
    })
}

/// Labels and annotations of a generated object declared by a template.
fn templated(component: &Component, meta: &TemplateMeta, body: Value) -> Desired {
    let mut labels = pod_labels(component);
    labels.extend(meta.labels.clone());
    let mut desired = Desired::new(body).with_labels(labels);
    desired.annotations = meta.annotations.clone();
    desired
}

/// Only the primary workload's observation feeds replica counts, so a
/// workload of another kind being absent never clears them.
fn forget_replicas(component: &mut Component, kind: ResourceKind) {
    if primary_workload(&component.spec) == kind {
        component.status.available_replicas = None;
    }
}

// =============================================================================
// Network
// =============================================================================

struct ServiceChild;

impl ChildDescriptor<Component> for ServiceChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn name(&self, parent: &Component) -> String {
        naming::service(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        parent.spec.has_service()
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let ports: Vec<Value> = parent
            .spec
            .ports
            .iter()
            .map(|p| {
                json!({
                    "name": p.service_port_name(),
                    "port": p.port,
                    "targetPort": p.target_port,
                    "protocol": "TCP",
                })
            })
            .collect();

        Ok(Desired::new(json!({
            "spec": {
                "selector": selector(parent),
                "ports": ports,
            }
        }))
        .with_labels(pod_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/selector", "/spec/ports"])
    }

    fn observe(&self, parent: &mut Component, child: &Object) {
        parent.status.service_name = Some(child.name().to_string());
    }

    fn forget(&self, parent: &mut Component) {
        parent.status.service_name = None;
    }
}

// =============================================================================
// Config
// =============================================================================

struct ConfigMapChild(Configuration);

impl ChildDescriptor<Component> for ConfigMapChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &Component) -> String {
        naming::component_resource(parent.name(), &self.0.metadata.name)
    }

    fn generation_key(&self, parent: &Component) -> String {
        instance_key(self.kind(), &self.name(parent))
    }

    fn required(&self, _parent: &Component) -> bool {
        true
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        Ok(templated(parent, &self.0.metadata, json!({"data": self.0.data})))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/data"])
    }
}

struct SecretChild(SecretTemplate);

impl ChildDescriptor<Component> for SecretChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Secret
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &Component) -> String {
        naming::component_resource(parent.name(), &self.0.metadata.name)
    }

    fn generation_key(&self, parent: &Component) -> String {
        instance_key(self.kind(), &self.name(parent))
    }

    fn required(&self, _parent: &Component) -> bool {
        true
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let mut data = self.0.data.clone();
        for (key, value) in &self.0.string_data {
            data.insert(key.clone(), base64_encode(value));
        }
        let secret_type = self.0.secret_type.as_deref().unwrap_or(SECRET_TYPE_OPAQUE);

        Ok(templated(
            parent,
            &self.0.metadata,
            json!({"type": secret_type, "data": data}),
        ))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/data"])
    }
}

/// A shared volume claim. Claims are immutable once bound, so nothing but
/// labels is kept in line after creation.
struct ClaimChild(ClaimTemplate);

impl ChildDescriptor<Component> for ClaimChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PersistentVolumeClaim
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &Component) -> String {
        naming::component_resource(parent.name(), &self.0.metadata.name)
    }

    fn generation_key(&self, parent: &Component) -> String {
        instance_key(self.kind(), &self.name(parent))
    }

    fn required(&self, _parent: &Component) -> bool {
        true
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        Ok(templated(parent, &self.0.metadata, json!({"spec": self.0.spec})))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::empty()
    }
}

// =============================================================================
// Workload
// =============================================================================

struct DeploymentChild {
    autoscaled: bool,
}

impl ChildDescriptor<Component> for DeploymentChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Component) -> String {
        naming::deployment(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        primary_workload(&parent.spec) == ResourceKind::Deployment
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let mut spec = Map::new();
        spec.insert("selector".to_string(), json!({"matchLabels": selector(parent)}));
        spec.insert("template".to_string(), pod_template(parent));
        if !self.autoscaled {
            spec.insert(
                "replicas".to_string(),
                json!(parent.spec.scaling_policy.replicas.unwrap_or(1)),
            );
        }

        Ok(Desired::new(json!({"spec": spec})).with_labels(pod_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        let fields = FieldSet::new(["/spec/template"]);
        if self.autoscaled {
            fields
        } else {
            fields.with("/spec/replicas")
        }
    }

    fn observe(&self, parent: &mut Component, child: &Object) {
        parent.status.available_replicas = Some(child.status_i64("/availableReplicas"));
    }

    fn forget(&self, parent: &mut Component) {
        forget_replicas(parent, self.kind());
    }
}

struct StatefulSetChild {
    autoscaled: bool,
}

impl ChildDescriptor<Component> for StatefulSetChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StatefulSet
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Component) -> String {
        naming::stateful_set(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        parent.spec.workload_type == WorkloadType::StatefulSet
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let claim_templates: Vec<Value> = parent
            .spec
            .volume_claims
            .iter()
            .filter(|c| !c.shared)
            .map(|c| {
                json!({
                    "metadata": {
                        "name": c.template.metadata.name,
                        "labels": c.template.metadata.labels,
                    },
                    "spec": c.template.spec,
                })
            })
            .collect();

        let mut spec = Map::new();
        spec.insert("serviceName".to_string(), json!(naming::service(parent.name())));
        spec.insert("selector".to_string(), json!({"matchLabels": selector(parent)}));
        spec.insert("template".to_string(), pod_template(parent));
        if !claim_templates.is_empty() {
            spec.insert("volumeClaimTemplates".to_string(), Value::Array(claim_templates));
        }
        if !self.autoscaled {
            spec.insert(
                "replicas".to_string(),
                json!(parent.spec.scaling_policy.replicas.unwrap_or(1)),
            );
        }

        Ok(Desired::new(json!({"spec": spec})).with_labels(pod_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        let fields = FieldSet::new(["/spec/template"]);
        if self.autoscaled {
            fields
        } else {
            fields.with("/spec/replicas")
        }
    }

    fn observe(&self, parent: &mut Component, child: &Object) {
        parent.status.available_replicas = Some(child.status_i64("/readyReplicas"));
    }

    fn forget(&self, parent: &mut Component) {
        forget_replicas(parent, self.kind());
    }
}

/// Run-to-completion workload.
///
/// A Job's pod template is immutable, so a changed template is carried in a
/// hash annotation and the Job is deleted and created again.
struct JobChild;

impl JobChild {
    fn body(parent: &Component) -> Value {
        let mut template = pod_template(parent);
        if let Some(pod) = template.get_mut("spec").and_then(Value::as_object_mut) {
            pod.entry("restartPolicy")
                .or_insert_with(|| json!(JOB_RESTART_POLICY));
        }
        json!({"spec": {"template": template}})
    }
}

impl ChildDescriptor<Component> for JobChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Job
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Component) -> String {
        naming::job(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        parent.spec.workload_type == WorkloadType::Job
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let body = Self::body(parent);
        let hash = ContentHash::from_json(&body);
        Ok(Desired::new(body)
            .with_labels(pod_labels(parent))
            .with_annotation(annotations::CONFIG_HASH, hash.as_str()))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::empty()
    }

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Recreate
    }

    fn propagation(&self) -> Propagation {
        Propagation::Foreground
    }

    fn observe(&self, parent: &mut Component, child: &Object) {
        let running = child.status_i64("/active") + child.status_i64("/succeeded");
        parent.status.available_replicas = Some(running);
    }

    fn forget(&self, parent: &mut Component) {
        forget_replicas(parent, self.kind());
    }
}

/// Knative Configuration for components with a KPA scaling policy.
struct ServingChild;

impl ChildDescriptor<Component> for ServingChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ServingConfiguration
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Component) -> String {
        naming::serving(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        primary_workload(&parent.spec) == ResourceKind::ServingConfiguration
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let mut scaling = BTreeMap::from([(
            autoscaling::CLASS.to_string(),
            autoscaling::KPA_CLASS.to_string(),
        )]);
        let mut pod = component_pod_spec(parent.name(), &parent.spec);

        if let Some(kpa) = parent.spec.kpa() {
            if let Some(min) = kpa.min_replicas {
                scaling.insert(autoscaling::MIN_SCALE.to_string(), min.to_string());
            }
            scaling.insert(autoscaling::MAX_SCALE.to_string(), kpa.max_replicas.to_string());
            if let Some(concurrency) = kpa.concurrency {
                scaling.insert(autoscaling::TARGET.to_string(), concurrency.to_string());
                pod["containerConcurrency"] = json!(concurrency);
            }
            if let Some(utilization) = kpa.target_utilization_percentage {
                scaling.insert(
                    autoscaling::TARGET_UTILIZATION.to_string(),
                    utilization.to_string(),
                );
            }
        }

        Ok(Desired::new(json!({
            "spec": {
                "template": {
                    "metadata": {
                        "labels": pod_labels(parent),
                        "annotations": scaling,
                    },
                    "spec": pod,
                }
            }
        }))
        .with_labels(pod_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/template"])
    }

    fn observe(&self, parent: &mut Component, child: &Object) {
        parent.status.serving_ready = Some(child.condition_status("Ready") == Some("True"));
    }

    fn forget(&self, parent: &mut Component) {
        parent.status.serving_ready = None;
    }
}

// =============================================================================
// Scaling
// =============================================================================

struct AutoscalerChild;

impl ChildDescriptor<Component> for AutoscalerChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HorizontalPodAutoscaler
    }

    fn stage(&self) -> Stage {
        Stage::Scaling
    }

    fn name(&self, parent: &Component) -> String {
        naming::autoscaler(parent.name())
    }

    fn required(&self, parent: &Component) -> bool {
        parent.spec.hpa().is_some()
    }

    fn build(&self, parent: &Component) -> Result<Desired, ReconcileError> {
        let hpa = parent.spec.hpa().ok_or_else(|| {
            ReconcileError::InvalidSpec(format!("component {} has no HPA policy", parent.name()))
        })?;

        let (target_kind, target_name) = match parent.spec.workload_type {
            WorkloadType::StatefulSet => (ResourceKind::StatefulSet, naming::stateful_set(parent.name())),
            _ => (ResourceKind::Deployment, naming::deployment(parent.name())),
        };

        let mut spec = Map::new();
        spec.insert(
            "scaleTargetRef".to_string(),
            json!({
                "apiVersion": target_kind.api_version(),
                "kind": target_kind.kind(),
                "name": target_name,
            }),
        );
        if let Some(min) = hpa.min_replicas {
            spec.insert("minReplicas".to_string(), json!(min));
        }
        spec.insert("maxReplicas".to_string(), json!(hpa.max_replicas));
        if !hpa.metrics.is_empty() {
            spec.insert("metrics".to_string(), json!(hpa.metrics));
        }

        Ok(Desired::new(json!({"spec": spec})).with_labels(pod_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

#[cfg(test)]
mod tests {
    use cellmesh_reconcile::{Object, ResourceKind};

    use super::*;

    fn component(spec: Value) -> Component {
        let object = Object::new(ResourceKind::Component, "default", "hr--employee")
            .with_body(json!({"spec": spec}));
        Component::from_object(&object).unwrap()
    }

    fn required(component: &Component) -> Vec<(ResourceKind, String)> {
        children(component)
            .iter()
            .filter(|c| c.required(component))
            .map(|c| (c.kind(), c.name(component)))
            .collect()
    }

    fn find(component: &Component, kind: ResourceKind) -> Box<dyn ChildDescriptor<Component>> {
        children(component)
            .into_iter()
            .find(|c| c.kind() == kind)
            .unwrap()
    }

    #[test]
    fn test_deployment_component_children() {
        let c = component(json!({
            "template": {"containers": [{"name": "main", "image": "employee:1.0"}]},
            "ports": [{"port": 80, "targetPort": 8080}],
            "configurations": [{"metadata": {"name": "config"}, "data": {"a": "1"}}]
        }));

        assert_eq!(
            required(&c),
            vec![
                (ResourceKind::Service, "hr--employee-service".to_string()),
                (ResourceKind::ConfigMap, "hr--employee-config".to_string()),
                (ResourceKind::Deployment, "hr--employee-deployment".to_string()),
            ]
        );
    }

    #[test]
    fn test_job_has_no_service() {
        let c = component(json!({"type": "Job", "ports": [{"port": 80, "targetPort": 8080}]}));
        assert_eq!(
            required(&c),
            vec![(ResourceKind::Job, "hr--employee-job".to_string())]
        );
    }

    #[test]
    fn test_kpa_component_is_served() {
        let c = component(json!({
            "template": {"containers": [{"name": "main"}]},
            "scalingPolicy": {"kpa": {"minReplicas": 0, "maxReplicas": 3, "concurrency": 10}}
        }));
        assert_eq!(primary_workload(&c.spec), ResourceKind::ServingConfiguration);

        let desired = find(&c, ResourceKind::ServingConfiguration).build(&c).unwrap();
        let template = &desired.body["spec"]["template"];
        assert_eq!(template["metadata"]["annotations"][autoscaling::MAX_SCALE], "3");
        assert_eq!(template["metadata"]["annotations"][autoscaling::TARGET], "10");
        assert_eq!(template["spec"]["containerConcurrency"], 10);
        assert!(!find(&c, ResourceKind::Deployment).required(&c));
    }

    #[test]
    fn test_hpa_leaves_replicas_to_the_autoscaler() {
        let c = component(json!({
            "template": {"containers": [{"name": "main"}]},
            "scalingPolicy": {"replicas": 3, "hpa": {"minReplicas": 1, "maxReplicas": 5}}
        }));

        let deployment = find(&c, ResourceKind::Deployment);
        let desired = deployment.build(&c).unwrap();
        assert!(desired.body["spec"].get("replicas").is_none());
        assert_eq!(deployment.mutable_fields(), FieldSet::new(["/spec/template"]));

        let hpa = find(&c, ResourceKind::HorizontalPodAutoscaler).build(&c).unwrap();
        assert_eq!(
            hpa.body["spec"]["scaleTargetRef"],
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "name": "hr--employee-deployment"})
        );
        assert_eq!(hpa.body["spec"]["maxReplicas"], 5);
    }

    #[test]
    fn test_deployment_pod_template_carries_component_label() {
        let mut c = component(json!({"template": {"containers": [{"name": "main"}]}}));
        c.meta
            .labels
            .insert(labels::CELL.to_string(), "hr".to_string());

        let desired = find(&c, ResourceKind::Deployment).build(&c).unwrap();
        let spec = &desired.body["spec"];
        assert_eq!(spec["replicas"], 1);
        assert_eq!(
            spec["selector"]["matchLabels"],
            json!({"mesh.cellery.io/component": "hr--employee"})
        );
        assert_eq!(
            spec["template"]["metadata"]["labels"],
            json!({"mesh.cellery.io/cell": "hr", "mesh.cellery.io/component": "hr--employee"})
        );
    }

    #[test]
    fn test_secret_encodes_string_data() {
        let c = component(json!({
            "secrets": [{"metadata": {"name": "creds"}, "data": {"a": "YQ=="}, "stringData": {"b": "b"}}]
        }));

        let desired = find(&c, ResourceKind::Secret).build(&c).unwrap();
        assert_eq!(desired.body["type"], "Opaque");
        assert_eq!(desired.body["data"], json!({"a": "YQ==", "b": "Yg=="}));
        assert_eq!(
            find(&c, ResourceKind::Secret).generation_key(&c),
            "Secret/hr--employee-creds"
        );
    }

    #[test]
    fn test_stateful_set_claims() {
        let c = component(json!({
            "type": "StatefulSet",
            "template": {"containers": [{"name": "main"}]},
            "volumeClaims": [
                {"shared": false, "template": {"metadata": {"name": "data"}, "spec": {"accessModes": ["ReadWriteOnce"]}}},
                {"shared": true, "template": {"metadata": {"name": "shared"}, "spec": {"accessModes": ["ReadWriteMany"]}}}
            ]
        }));

        let desired = find(&c, ResourceKind::StatefulSet).build(&c).unwrap();
        let claims = desired.body["spec"]["volumeClaimTemplates"].as_array().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0]["metadata"]["name"], "data");
        assert_eq!(desired.body["spec"]["serviceName"], "hr--employee-service");

        let claim = find(&c, ResourceKind::PersistentVolumeClaim);
        assert_eq!(claim.name(&c), "hr--employee-shared");
    }

    #[test]
    fn test_job_hash_follows_template() {
        let before = component(json!({"type": "Job", "template": {"containers": [{"name": "main", "image": "migrate:1"}]}}));
        let after = component(json!({"type": "Job", "template": {"containers": [{"name": "main", "image": "migrate:2"}]}}));

        let job = find(&before, ResourceKind::Job);
        let a = job.build(&before).unwrap();
        let b = job.build(&after).unwrap();
        assert_ne!(
            a.annotations[annotations::CONFIG_HASH],
            b.annotations[annotations::CONFIG_HASH]
        );
        assert_eq!(a.body["spec"]["template"]["spec"]["restartPolicy"], "Never");
        assert_eq!(job.update_strategy(), UpdateStrategy::Recreate);
        assert_eq!(job.propagation(), Propagation::Foreground);
    }

    #[test]
    fn test_forget_only_clears_primary_workload() {
        let mut c = component(json!({"type": "Job"}));
        c.status.available_replicas = Some(1);

        find(&c, ResourceKind::Deployment).forget(&mut c);
        assert_eq!(c.status.available_replicas, Some(1));

        find(&c, ResourceKind::Job).forget(&mut c);
        assert_eq!(c.status.available_replicas, None);
    }

    #[test]
    fn test_aggregate() {
        let mut c = component(json!({}));
        assert_eq!(aggregate(&c), AggregateState::NotReady);
        c.status.available_replicas = Some(1);
        assert_eq!(aggregate(&c), AggregateState::Ready);

        let mut served = component(json!({"scalingPolicy": {"kpa": {"maxReplicas": 2}}}));
        served.status.available_replicas = Some(1);
        assert_eq!(aggregate(&served), AggregateState::NotReady);
        served.status.serving_ready = Some(true);
        assert_eq!(aggregate(&served), AggregateState::Ready);
    }
}
