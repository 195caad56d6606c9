//! Children of a TokenService.

use std::collections::BTreeMap;

use cellmesh_reconcile::{
    ChildDescriptor, ContentHash, Desired, FieldSet, Object, ReconcileError, ResourceKind, Stage,
};
use serde_json::{json, Value};

use super::{ext_authz_patch, labels_with};
use crate::config::MeshConfig;
use crate::model::{AggregateState, InterceptMode, TokenService};
use crate::naming::{self, annotations, labels};
use crate::state::MeshState;

/// Port intercepting inbound traffic.
pub const INBOUND_PORT: i32 = 8080;
/// Port intercepting outbound traffic.
pub const OUTBOUND_PORT: i32 = 8081;
/// Port serving the signing keys.
pub const JWKS_PORT: i32 = 8090;

const CONFIG_KEY: &str = "sts.json";
const DEFAULT_POLICY_KEY: &str = "default.rego";

const CONFIG_MOUNT: &str = "/etc/config";
const KEYS_MOUNT: &str = "/etc/certs";
const POLICY_MOUNT: &str = "/policies";

/// Every child a token service may have, required or not.
pub fn children(sts: &TokenService, state: &MeshState) -> Vec<Box<dyn ChildDescriptor<TokenService>>> {
    let mesh = state.mesh();
    let config = config_data(sts, mesh);
    let policy = policy_data(sts, mesh);

    vec![
        Box::new(ServiceChild),
        Box::new(ConfigChild(config.clone())),
        Box::new(PolicyChild(policy.clone())),
        Box::new(DeploymentChild {
            image: mesh.sts_image.clone(),
            opa_image: mesh.sts_opa_image.clone(),
            has_keys: state.secret().is_some() && !sts.spec.instance_name.is_empty(),
            config_hash: ContentHash::from_json(&json!({"config": config, "policy": policy})),
        }),
        Box::new(EnvoyFilterChild),
    ]
}

/// Ready iff the token service deployment has an available replica.
pub fn aggregate(sts: &TokenService) -> AggregateState {
    AggregateState::from_ready(sts.status.available_replicas.unwrap_or(0) >= 1)
}

/// The mesh-wide configuration plus this instance's identity.
fn config_data(sts: &TokenService, mesh: &MeshConfig) -> BTreeMap<String, String> {
    let mut config = mesh.sts_config.clone();
    config.insert("cellName".to_string(), json!(sts.spec.instance_name));
    config.insert("composite".to_string(), json!(sts.spec.composite));
    BTreeMap::from([(CONFIG_KEY.to_string(), Value::Object(config).to_string())])
}

/// Declared policies, or the mesh default when none are declared.
fn policy_data(sts: &TokenService, mesh: &MeshConfig) -> BTreeMap<String, String> {
    if sts.spec.opa.is_empty() {
        return BTreeMap::from([(DEFAULT_POLICY_KEY.to_string(), mesh.sts_default_policy.clone())]);
    }
    sts.spec
        .opa
        .iter()
        .map(|p| (p.key.clone(), p.policy.clone()))
        .collect()
}

fn selector(sts: &TokenService) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::TOKEN_SERVICE.to_string(), sts.name().to_string())])
}

fn sts_labels(sts: &TokenService) -> BTreeMap<String, String> {
    labels_with(sts, labels::TOKEN_SERVICE, sts.name())
}

// =============================================================================
// Network
// =============================================================================

struct ServiceChild;

impl ChildDescriptor<TokenService> for ServiceChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn name(&self, parent: &TokenService) -> String {
        naming::service(parent.name())
    }

    fn required(&self, _parent: &TokenService) -> bool {
        true
    }

    fn build(&self, parent: &TokenService) -> Result<Desired, ReconcileError> {
        Ok(Desired::new(json!({
            "spec": {
                "selector": selector(parent),
                "ports": [
                    {"name": "grpc-inbound", "port": INBOUND_PORT, "targetPort": INBOUND_PORT, "protocol": "TCP"},
                    {"name": "grpc-outbound", "port": OUTBOUND_PORT, "targetPort": OUTBOUND_PORT, "protocol": "TCP"},
                    {"name": "http-jwks", "port": JWKS_PORT, "targetPort": JWKS_PORT, "protocol": "TCP"},
                ],
            }
        }))
        .with_labels(sts_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/selector", "/spec/ports"])
    }

    fn observe(&self, parent: &mut TokenService, child: &Object) {
        parent.status.service_name = Some(child.name().to_string());
    }

    fn forget(&self, parent: &mut TokenService) {
        parent.status.service_name = None;
    }
}

// =============================================================================
// Config
// =============================================================================

struct ConfigChild(BTreeMap<String, String>);

impl ChildDescriptor<TokenService> for ConfigChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &TokenService) -> String {
        naming::sts_config(parent.name())
    }

    fn generation_key(&self, parent: &TokenService) -> String {
        cellmesh_reconcile::instance_key(self.kind(), &self.name(parent))
    }

    fn required(&self, _parent: &TokenService) -> bool {
        true
    }

    fn build(&self, parent: &TokenService) -> Result<Desired, ReconcileError> {
        Ok(Desired::new(json!({"data": self.0})).with_labels(sts_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/data"])
    }
}

struct PolicyChild(BTreeMap<String, String>);

impl ChildDescriptor<TokenService> for PolicyChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigMap
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &TokenService) -> String {
        naming::sts_policy(parent.name())
    }

    fn generation_key(&self, parent: &TokenService) -> String {
        cellmesh_reconcile::instance_key(self.kind(), &self.name(parent))
    }

    fn required(&self, _parent: &TokenService) -> bool {
        true
    }

    fn build(&self, parent: &TokenService) -> Result<Desired, ReconcileError> {
        Ok(Desired::new(json!({"data": self.0})).with_labels(sts_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/data"])
    }
}

// =============================================================================
// Workload
// =============================================================================

struct DeploymentChild {
    image: String,
    opa_image: String,
    /// Mount the instance signing bundle.
    has_keys: bool,
    config_hash: ContentHash,
}

impl ChildDescriptor<TokenService> for DeploymentChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &TokenService) -> String {
        naming::deployment(parent.name())
    }

    fn required(&self, _parent: &TokenService) -> bool {
        true
    }

    fn build(&self, parent: &TokenService) -> Result<Desired, ReconcileError> {
        let mut mounts = vec![json!({"name": "config", "mountPath": CONFIG_MOUNT, "readOnly": true})];
        let mut volumes = vec![
            json!({"name": "config", "configMap": {"name": naming::sts_config(parent.name())}}),
            json!({"name": "policy", "configMap": {"name": naming::sts_policy(parent.name())}}),
        ];
        if self.has_keys {
            mounts.push(json!({"name": "keys", "mountPath": KEYS_MOUNT, "readOnly": true}));
            volumes.push(json!({
                "name": "keys",
                "secret": {"secretName": naming::instance_secret(&parent.spec.instance_name)},
            }));
        }

        let containers = json!([
            {
                "name": "sts",
                "image": self.image,
                "env": [{"name": "CELL_NAME", "value": parent.spec.instance_name}],
                "ports": [
                    {"containerPort": INBOUND_PORT},
                    {"containerPort": OUTBOUND_PORT},
                    {"containerPort": JWKS_PORT},
                ],
                "volumeMounts": mounts,
            },
            {
                "name": "opa",
                "image": self.opa_image,
                "args": ["run", "--server", "--addr=localhost:8181", POLICY_MOUNT],
                "volumeMounts": [{"name": "policy", "mountPath": POLICY_MOUNT, "readOnly": true}],
            },
        ]);
        let pod_annotations = BTreeMap::from([(
            annotations::CONFIG_HASH.to_string(),
            self.config_hash.as_str().to_string(),
        )]);

        Ok(Desired::new(json!({
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": selector(parent)},
                "template": {
                    "metadata": {
                        "labels": sts_labels(parent),
                        "annotations": pod_annotations,
                    },
                    "spec": {"containers": containers, "volumes": volumes},
                },
            }
        }))
        .with_labels(sts_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/template", "/spec/replicas"])
    }

    fn observe(&self, parent: &mut TokenService, child: &Object) {
        parent.status.available_replicas = Some(child.status_i64("/availableReplicas"));
    }

    fn forget(&self, parent: &mut TokenService) {
        parent.status.available_replicas = None;
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Sidecar filters sending the selected pods' traffic through the token
/// service in the intercepted directions.
struct EnvoyFilterChild;

impl ChildDescriptor<TokenService> for EnvoyFilterChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::EnvoyFilter
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &TokenService) -> String {
        naming::sts_envoy_filter(parent.name())
    }

    fn required(&self, parent: &TokenService) -> bool {
        parent.spec.intercept_mode != InterceptMode::None
    }

    fn build(&self, parent: &TokenService) -> Result<Desired, ReconcileError> {
        let host = naming::service(parent.name());
        let mode = parent.spec.intercept_mode;

        let mut patches = Vec::new();
        if matches!(mode, InterceptMode::Any | InterceptMode::Inbound) {
            patches.push(ext_authz_patch(
                "SIDECAR_INBOUND",
                &format!("{host}:{INBOUND_PORT}"),
                "sts_inbound",
            ));
        }
        if matches!(mode, InterceptMode::Any | InterceptMode::Outbound) {
            patches.push(ext_authz_patch(
                "SIDECAR_OUTBOUND",
                &format!("{host}:{OUTBOUND_PORT}"),
                "sts_outbound",
            ));
        }

        Ok(Desired::new(json!({
            "spec": {
                "workloadSelector": {"labels": parent.spec.selector},
                "configPatches": patches,
            }
        }))
        .with_labels(sts_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

#[cfg(test)]
mod tests {
    use cellmesh_reconcile::Object;

    use super::*;
    use crate::config::MeshSecret;
    use crate::routing::RoutingCompiler;

    fn sts(spec: Value) -> TokenService {
        let object = Object::new(ResourceKind::TokenService, "default", "hr--sts")
            .with_body(json!({"spec": spec}));
        TokenService::from_object(&object).unwrap()
    }

    fn find(
        sts: &TokenService,
        state: &MeshState,
        name: &str,
    ) -> Box<dyn ChildDescriptor<TokenService>> {
        children(sts, state)
            .into_iter()
            .find(|c| c.name(sts) == name)
            .unwrap()
    }

    fn with_secret() -> MeshState {
        let secret = MeshSecret {
            key_pem: "a2V5".to_string(),
            cert_pem: "Y2VydA==".to_string(),
            ca_chain_pem: "Y2E=".to_string(),
        };
        MeshState::new(MeshConfig::default(), Some(secret), RoutingCompiler::default())
    }

    #[test]
    fn test_config_carries_instance_name() {
        let s = sts(json!({"instanceName": "hr", "selector": {"mesh.cellery.io/cell": "hr"}}));
        let desired = find(&s, &MeshState::default(), "hr--sts-config")
            .build(&s)
            .unwrap();

        let config: Value =
            serde_json::from_str(desired.body["data"]["sts.json"].as_str().unwrap()).unwrap();
        assert_eq!(config["cellName"], "hr");
        assert_eq!(config["composite"], false);
    }

    #[test]
    fn test_default_policy_when_none_declared() {
        let s = sts(json!({"instanceName": "hr"}));
        let desired = find(&s, &MeshState::default(), "hr--sts-policy")
            .build(&s)
            .unwrap();
        assert_eq!(
            desired.body["data"],
            json!({"default.rego": crate::config::DEFAULT_STS_POLICY})
        );

        let s = sts(json!({"instanceName": "hr", "opa": [{"key": "hr.rego", "policy": "package hr"}]}));
        let desired = find(&s, &MeshState::default(), "hr--sts-policy")
            .build(&s)
            .unwrap();
        assert_eq!(desired.body["data"], json!({"hr.rego": "package hr"}));
    }

    #[test]
    fn test_policy_change_rolls_the_deployment() {
        let before = sts(json!({"instanceName": "hr"}));
        let after = sts(json!({"instanceName": "hr", "opa": [{"key": "hr.rego", "policy": "package hr"}]}));
        let state = MeshState::default();

        let hash = |s: &TokenService| {
            find(s, &state, "hr--sts-deployment").build(s).unwrap().body["spec"]["template"]
                ["metadata"]["annotations"]["mesh.cellery.io/config-hash"]
                .clone()
        };
        assert_ne!(hash(&before), hash(&after));
    }

    #[test]
    fn test_keys_mounted_with_mesh_secret() {
        let s = sts(json!({"instanceName": "hr"}));

        let without = find(&s, &MeshState::default(), "hr--sts-deployment")
            .build(&s)
            .unwrap();
        assert_eq!(without.body["spec"]["template"]["spec"]["volumes"].as_array().unwrap().len(), 2);

        let with = find(&s, &with_secret(), "hr--sts-deployment").build(&s).unwrap();
        let volumes = with.body["spec"]["template"]["spec"]["volumes"].as_array().unwrap();
        assert_eq!(volumes[2]["secret"]["secretName"], "hr--secret");
    }

    #[test]
    fn test_intercept_modes() {
        let state = MeshState::default();

        let any = sts(json!({"instanceName": "hr"}));
        let filter = find(&any, &state, "hr--sts-envoyfilter");
        let patches = filter.build(&any).unwrap().body["spec"]["configPatches"].clone();
        assert_eq!(patches.as_array().unwrap().len(), 2);

        let inbound = sts(json!({"instanceName": "hr", "interceptMode": "Inbound"}));
        let patches = filter.build(&inbound).unwrap().body["spec"]["configPatches"].clone();
        assert_eq!(patches.as_array().unwrap().len(), 1);
        assert_eq!(patches[0]["match"]["context"], "SIDECAR_INBOUND");

        let none = sts(json!({"instanceName": "hr", "interceptMode": "None"}));
        assert!(!filter.required(&none));
    }
}
