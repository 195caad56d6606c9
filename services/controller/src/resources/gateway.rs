//! Children of a Gateway.
//!
//! A gateway is a standalone proxy deployment fronted by a Service. When it
//! has routes it is bound to an Istio Gateway and VirtualService; the cluster
//! ingress and OIDC extensions add an Ingress, a TLS Secret and an
//! authorization filter.

use std::collections::BTreeMap;

use cellmesh_reconcile::{ChildDescriptor, Desired, FieldSet, Object, ReconcileError, ResourceKind, Stage};
use serde_json::{json, Value};

use super::{base64_encode, ext_authz_patch, labels_with};
use crate::model::{AggregateState, Gateway, GatewaySpec, HttpRoute, Oidc, PortRoute, RouteDestination};
use crate::naming::{self, annotations, labels};
use crate::state::MeshState;

/// Service port of the HTTP listener.
pub const HTTP_PORT: i32 = 80;
/// Container port of the HTTP listener.
pub const HTTP_TARGET_PORT: i32 = 8080;
/// Port of the OIDC authorization container.
pub const OIDC_PORT: i32 = 15800;

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Every child a gateway may have, required or not.
pub fn children(state: &MeshState) -> Vec<Box<dyn ChildDescriptor<Gateway>>> {
    let mesh = state.mesh();
    vec![
        Box::new(ServiceChild),
        Box::new(TlsSecretChild),
        Box::new(DeploymentChild {
            image: mesh.gateway_image.clone(),
            oidc_image: mesh.gateway_oidc_image.clone(),
        }),
        Box::new(IstioGatewayChild),
        Box::new(VirtualServiceChild),
        Box::new(IngressChild),
        Box::new(OidcFilterChild),
    ]
}

/// Ready iff the gateway deployment has an available replica.
pub fn aggregate(gateway: &Gateway) -> AggregateState {
    AggregateState::from_ready(gateway.status.available_replicas.unwrap_or(0) >= 1)
}

fn selector(gateway: &Gateway) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::GATEWAY.to_string(), gateway.name().to_string())])
}

fn gateway_labels(gateway: &Gateway) -> BTreeMap<String, String> {
    labels_with(gateway, labels::GATEWAY, gateway.name())
}

/// Listener ports: `(name, service port, container port, istio protocol)`.
fn listeners(spec: &GatewaySpec) -> Vec<(String, i32, i32, &'static str)> {
    let mut ports = vec![("http".to_string(), HTTP_PORT, HTTP_TARGET_PORT, "HTTP")];
    ports.extend(
        spec.ingress
            .grpc
            .iter()
            .map(|r| (format!("grpc-{}", r.port), r.port, r.port, "GRPC")),
    );
    ports.extend(
        spec.ingress
            .tcp
            .iter()
            .map(|r| (format!("tcp-{}", r.port), r.port, r.port, "TCP")),
    );
    ports
}

fn destination(target: &RouteDestination) -> Value {
    let mut destination = json!({"host": target.host});
    if let Some(port) = target.port {
        destination["port"] = json!({"number": port});
    }
    destination
}

/// URI prefix of an HTTP route context, always wrapped in slashes.
fn context_prefix(context: &str) -> String {
    match context.trim_matches('/') {
        "" => "/".to_string(),
        trimmed => format!("/{trimmed}/"),
    }
}

fn http_route(route: &HttpRoute) -> Value {
    json!({
        "match": [{"uri": {"prefix": context_prefix(&route.context)}}],
        "rewrite": {"uri": "/"},
        "route": [{"destination": destination(&route.destination)}],
    })
}

fn port_route(route: &PortRoute) -> Value {
    json!({
        "match": [{"port": route.port}],
        "route": [{"destination": destination(&route.destination)}],
    })
}

// =============================================================================
// Network
// =============================================================================

struct ServiceChild;

impl ChildDescriptor<Gateway> for ServiceChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::service(parent.name())
    }

    fn required(&self, _parent: &Gateway) -> bool {
        true
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let ports: Vec<Value> = listeners(&parent.spec)
            .into_iter()
            .map(|(name, port, target, _)| {
                json!({"name": name, "port": port, "targetPort": target, "protocol": "TCP"})
            })
            .collect();

        Ok(Desired::new(json!({
            "spec": {"selector": selector(parent), "ports": ports}
        }))
        .with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/selector", "/spec/ports"])
    }

    fn observe(&self, parent: &mut Gateway, child: &Object) {
        parent.status.service_name = Some(child.name().to_string());
    }

    fn forget(&self, parent: &mut Gateway) {
        parent.status.service_name = None;
    }
}

// =============================================================================
// Config
// =============================================================================

/// TLS secret of the cluster ingress, generated from an inline key pair.
struct TlsSecretChild;

impl ChildDescriptor<Gateway> for TlsSecretChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Secret
    }

    fn stage(&self) -> Stage {
        Stage::Config
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::gateway_tls_secret(parent.name())
    }

    fn required(&self, parent: &Gateway) -> bool {
        parent
            .spec
            .ingress
            .extensions
            .cluster_ingress
            .as_ref()
            .and_then(|i| i.tls.as_ref())
            .is_some_and(|tls| tls.has_inline_pair())
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let tls = parent
            .spec
            .ingress
            .extensions
            .cluster_ingress
            .as_ref()
            .and_then(|i| i.tls.as_ref());
        let (Some(key), Some(cert)) = (
            tls.and_then(|t| t.key.as_deref()),
            tls.and_then(|t| t.cert.as_deref()),
        ) else {
            return Err(ReconcileError::InvalidSpec(format!(
                "gateway {} has no inline TLS key pair",
                parent.name()
            )));
        };

        Ok(Desired::new(json!({
            "type": TLS_SECRET_TYPE,
            "data": {
                "tls.key": base64_encode(key),
                "tls.crt": base64_encode(cert),
            }
        }))
        .with_labels(gateway_labels(parent)))
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
    oidc_image: String,
}

impl DeploymentChild {
    fn oidc_container(&self, oidc: &Oidc) -> Value {
        json!({
            "name": "oidc",
            "image": self.oidc_image,
            "ports": [{"containerPort": OIDC_PORT}],
            "env": [
                {"name": "PROVIDER_URL", "value": oidc.provider_url},
                {"name": "CLIENT_ID", "value": oidc.client_id},
                {"name": "CLIENT_SECRET", "value": oidc.client_secret},
                {"name": "REDIRECT_URL", "value": oidc.redirect_url},
                {"name": "APP_BASE_URL", "value": oidc.base_url},
                {"name": "SUBJECT_CLAIM", "value": oidc.subject_claim},
                {"name": "NON_SECURE_PATHS", "value": oidc.non_secure_paths.join(",")},
                {"name": "SECURE_PATHS", "value": oidc.secure_paths.join(",")},
            ],
        })
    }
}

impl ChildDescriptor<Gateway> for DeploymentChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Deployment
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::deployment(parent.name())
    }

    fn required(&self, _parent: &Gateway) -> bool {
        true
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let ports: Vec<Value> = listeners(&parent.spec)
            .into_iter()
            .map(|(_, _, target, _)| json!({"containerPort": target}))
            .collect();

        let mut containers = vec![json!({
            "name": "gateway",
            "image": self.image,
            "args": ["proxy", "router", "--serviceCluster", parent.name()],
            "ports": ports,
        })];
        if let Some(oidc) = &parent.spec.ingress.extensions.oidc {
            containers.push(self.oidc_container(oidc));
        }
        let pod_annotations =
            BTreeMap::from([(annotations::SIDECAR_INJECT.to_string(), "false".to_string())]);

        Ok(Desired::new(json!({
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": selector(parent)},
                "template": {
                    "metadata": {
                        "labels": gateway_labels(parent),
                        "annotations": pod_annotations,
                    },
                    "spec": {"containers": containers},
                },
            }
        }))
        .with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec/template", "/spec/replicas"])
    }

    fn observe(&self, parent: &mut Gateway, child: &Object) {
        parent.status.available_replicas = Some(child.status_i64("/availableReplicas"));
    }

    fn forget(&self, parent: &mut Gateway) {
        parent.status.available_replicas = None;
    }
}

// =============================================================================
// Routing
// =============================================================================

struct IstioGatewayChild;

impl ChildDescriptor<Gateway> for IstioGatewayChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::IstioGateway
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &Gateway) -> String {
        parent.name().to_string()
    }

    fn required(&self, parent: &Gateway) -> bool {
        parent.spec.has_routes()
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let servers: Vec<Value> = listeners(&parent.spec)
            .into_iter()
            .map(|(name, port, _, protocol)| {
                json!({
                    "port": {"number": port, "name": name, "protocol": protocol},
                    "hosts": ["*"],
                })
            })
            .collect();

        Ok(Desired::new(json!({
            "spec": {"selector": selector(parent), "servers": servers}
        }))
        .with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

struct VirtualServiceChild;

impl ChildDescriptor<Gateway> for VirtualServiceChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualService
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::gateway_virtual_service(parent.name())
    }

    fn required(&self, parent: &Gateway) -> bool {
        parent.spec.has_routes()
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let ingress = &parent.spec.ingress;
        let mut http: Vec<Value> = ingress.http.iter().map(http_route).collect();
        http.extend(ingress.grpc.iter().map(port_route));
        let tcp: Vec<Value> = ingress.tcp.iter().map(port_route).collect();

        let mut spec = json!({
            "hosts": ["*"],
            "gateways": [parent.name()],
        });
        if !http.is_empty() {
            spec["http"] = Value::Array(http);
        }
        if !tcp.is_empty() {
            spec["tcp"] = Value::Array(tcp);
        }

        Ok(Desired::new(json!({"spec": spec})).with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

/// Cluster ingress publishing the gateway on an external host.
struct IngressChild;

impl ChildDescriptor<Gateway> for IngressChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::gateway_ingress(parent.name())
    }

    fn required(&self, parent: &Gateway) -> bool {
        parent.spec.ingress.extensions.cluster_ingress.is_some()
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let Some(ingress) = &parent.spec.ingress.extensions.cluster_ingress else {
            return Err(ReconcileError::InvalidSpec(format!(
                "gateway {} has no cluster ingress",
                parent.name()
            )));
        };

        let mut spec = json!({
            "rules": [{
                "host": ingress.host,
                "http": {"paths": [{
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": {"service": {
                        "name": naming::service(parent.name()),
                        "port": {"number": HTTP_PORT},
                    }},
                }]},
            }]
        });

        let secret = ingress.tls.as_ref().and_then(|tls| match &tls.secret {
            Some(secret) => Some(secret.clone()),
            None if tls.has_inline_pair() => Some(naming::gateway_tls_secret(parent.name())),
            None => None,
        });
        if let Some(secret) = secret {
            spec["tls"] = json!([{"hosts": [ingress.host], "secretName": secret}]);
        }

        Ok(Desired::new(json!({"spec": spec})).with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }

    fn observe(&self, parent: &mut Gateway, child: &Object) {
        parent.status.hostname = child
            .body
            .pointer("/spec/rules/0/host")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    fn forget(&self, parent: &mut Gateway) {
        parent.status.hostname = None;
    }
}

/// Authorization filter sending gateway requests through the OIDC container.
struct OidcFilterChild;

impl ChildDescriptor<Gateway> for OidcFilterChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::EnvoyFilter
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &Gateway) -> String {
        naming::gateway_oidc_filter(parent.name())
    }

    fn required(&self, parent: &Gateway) -> bool {
        parent.spec.ingress.extensions.oidc.is_some()
    }

    fn build(&self, parent: &Gateway) -> Result<Desired, ReconcileError> {
        let target = format!("127.0.0.1:{OIDC_PORT}");
        Ok(Desired::new(json!({
            "spec": {
                "workloadSelector": {"labels": selector(parent)},
                "configPatches": [ext_authz_patch("GATEWAY", &target, "oidc")],
            }
        }))
        .with_labels(gateway_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

#[cfg(test)]
mod tests {
    use cellmesh_reconcile::Object;

    use super::*;

    fn gateway(spec: Value) -> Gateway {
        let object = Object::new(ResourceKind::Gateway, "default", "hr--gateway")
            .with_body(json!({"spec": spec}));
        Gateway::from_object(&object).unwrap()
    }

    fn required(gateway: &Gateway) -> Vec<(ResourceKind, String)> {
        children(&MeshState::default())
            .iter()
            .filter(|c| c.required(gateway))
            .map(|c| (c.kind(), c.name(gateway)))
            .collect()
    }

    fn build(gateway: &Gateway, kind: ResourceKind) -> Desired {
        children(&MeshState::default())
            .into_iter()
            .find(|c| c.kind() == kind)
            .unwrap()
            .build(gateway)
            .unwrap()
    }

    #[test]
    fn test_gateway_without_routes() {
        let g = gateway(json!({}));
        assert_eq!(
            required(&g),
            vec![
                (ResourceKind::Service, "hr--gateway-service".to_string()),
                (ResourceKind::Deployment, "hr--gateway-deployment".to_string()),
            ]
        );
    }

    #[test]
    fn test_gateway_with_every_extension() {
        let g = gateway(json!({"ingress": {
            "http": [{"context": "hr", "destination": {"host": "hr--hr-service", "port": 8080}}],
            "extensions": {
                "clusterIngress": {"host": "hr.example.com", "tls": {"key": "KEY", "cert": "CERT"}},
                "oidc": {
                    "providerUrl": "https://idp", "clientId": "hr", "redirectUrl": "https://hr/cb",
                    "baseUrl": "https://hr/"
                }
            }
        }}));

        let kinds: Vec<ResourceKind> = required(&g).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Service,
                ResourceKind::Secret,
                ResourceKind::Deployment,
                ResourceKind::IstioGateway,
                ResourceKind::VirtualService,
                ResourceKind::Ingress,
                ResourceKind::EnvoyFilter,
            ]
        );

        let ingress = build(&g, ResourceKind::Ingress);
        assert_eq!(
            ingress.body["spec"]["tls"],
            json!([{"hosts": ["hr.example.com"], "secretName": "hr--gateway-tls-secret"}])
        );

        let deployment = build(&g, ResourceKind::Deployment);
        let containers = deployment.body["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1]["name"], "oidc");
        assert_eq!(
            deployment.body["spec"]["template"]["metadata"]["annotations"]["sidecar.istio.io/inject"],
            "false"
        );
    }

    #[test]
    fn test_virtual_service_routes() {
        let g = gateway(json!({"ingress": {
            "http": [{"context": "/hr/", "destination": {"host": "hr--hr-service"}}],
            "grpc": [{"port": 9000, "destination": {"host": "hr--api-service", "port": 9000}}],
            "tcp": [{"port": 5432, "destination": {"host": "hr--db-service", "port": 5432}}]
        }}));

        let desired = build(&g, ResourceKind::VirtualService);
        let spec = &desired.body["spec"];
        assert_eq!(spec["gateways"], json!(["hr--gateway"]));
        assert_eq!(spec["http"][0]["match"][0]["uri"]["prefix"], "/hr/");
        assert_eq!(spec["http"][0]["route"][0]["destination"], json!({"host": "hr--hr-service"}));
        assert_eq!(spec["http"][1]["match"][0]["port"], 9000);
        assert_eq!(
            spec["tcp"][0]["route"][0]["destination"],
            json!({"host": "hr--db-service", "port": {"number": 5432}})
        );

        let service = build(&g, ResourceKind::Service);
        let names: Vec<&str> = service.body["spec"]["ports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["http", "grpc-9000", "tcp-5432"]);
    }

    #[test]
    fn test_existing_tls_secret_is_referenced() {
        let g = gateway(json!({"ingress": {"extensions": {
            "clusterIngress": {"host": "hr.example.com", "tls": {"secret": "wildcard-tls"}}
        }}}));

        assert!(!required(&g).iter().any(|(k, _)| *k == ResourceKind::Secret));
        let ingress = build(&g, ResourceKind::Ingress);
        assert_eq!(ingress.body["spec"]["tls"][0]["secretName"], "wildcard-tls");
    }

    #[test]
    fn test_context_prefix() {
        assert_eq!(context_prefix("hr"), "/hr/");
        assert_eq!(context_prefix("/hr"), "/hr/");
        assert_eq!(context_prefix("/"), "/");
    }

    #[test]
    fn test_aggregate() {
        let mut g = gateway(json!({}));
        assert_eq!(aggregate(&g), AggregateState::NotReady);
        g.status.available_replicas = Some(2);
        assert_eq!(aggregate(&g), AggregateState::Ready);
    }
}
