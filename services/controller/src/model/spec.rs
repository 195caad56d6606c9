//! Parent specs.
//!
//! Specs are parsed from the `spec` field of the parent objects and
//! re-serialized into nested parents (a Cell's components become Component
//! objects). Every optional field skips serialization when empty so the
//! serialized form is stable across passes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Shared
// =============================================================================

/// Name plus the labels and annotations copied onto a generated object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

// =============================================================================
// Component
// =============================================================================

/// Kind of workload a component runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkloadType {
    #[default]
    Deployment,
    StatefulSet,
    Job,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(rename = "type", default)]
    pub workload_type: WorkloadType,

    #[serde(default)]
    pub scaling_policy: ScalingPolicy,

    /// Pod spec, passed through with ports and volume names filled in.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub template: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claims: Vec<VolumeClaim>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<Configuration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretTemplate>,
}

impl ComponentSpec {
    /// Knative autoscaling applies to Deployments only.
    pub fn kpa(&self) -> Option<&KpaPolicy> {
        match self.workload_type {
            WorkloadType::Deployment => self.scaling_policy.kpa.as_ref(),
            _ => None,
        }
    }

    /// HPA applies to long-running workloads without Knative autoscaling.
    pub fn hpa(&self) -> Option<&HpaPolicy> {
        match self.workload_type {
            WorkloadType::Job => None,
            _ if self.kpa().is_some() => None,
            _ => self.scaling_policy.hpa.as_ref(),
        }
    }

    /// A component gets a Service iff it has ports and keeps running.
    pub fn has_service(&self) -> bool {
        !self.ports.is_empty() && self.workload_type != WorkloadType::Job
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa: Option<HpaPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpa: Option<KpaPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HpaPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    pub max_replicas: i32,

    /// Autoscaling v2 metric specs, passed through.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpaPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    pub max_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_utilization_percentage: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
    Tcp,
}

impl Protocol {
    /// Port-name prefix the mesh uses for protocol selection.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default)]
    pub protocol: Protocol,

    pub port: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_container: String,

    pub target_port: i32,
}

impl PortMapping {
    /// Service port name, prefixed with the protocol.
    pub fn service_port_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}-{}", self.protocol.prefix(), self.port)
        } else {
            format!("{}-{}", self.protocol.prefix(), self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeClaim {
    /// Shared claims become standalone claims; others become per-replica
    /// claim templates of a StatefulSet.
    #[serde(default)]
    pub shared: bool,

    pub template: ClaimTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimTemplate {
    pub metadata: TemplateMeta,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub metadata: TemplateMeta,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    pub metadata: TemplateMeta,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,

    /// Base64-encoded values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,

    /// Plain values, encoded on write.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

/// A component declared inside a Cell or Composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    pub metadata: TemplateMeta,

    #[serde(default)]
    pub spec: ComponentSpec,
}

impl ComponentTemplate {
    /// A component is exposed to dependents iff it gets a Service.
    pub fn is_exposed(&self) -> bool {
        self.spec.has_service()
    }
}

// =============================================================================
// Gateway
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    #[serde(default)]
    pub ingress: IngressSpec,
}

impl GatewaySpec {
    pub fn has_routes(&self) -> bool {
        !self.ingress.http.is_empty() || !self.ingress.grpc.is_empty() || !self.ingress.tcp.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grpc: Vec<PortRoute>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<PortRoute>,

    #[serde(default, skip_serializing_if = "Extensions::is_empty")]
    pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub context: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    pub destination: RouteDestination,

    /// Published through the cluster ingress as well.
    #[serde(default)]
    pub global: bool,

    #[serde(default)]
    pub authenticate: bool,
}

/// gRPC and TCP routes are matched on the gateway port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRoute {
    pub port: i32,

    pub destination: RouteDestination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ingress: Option<ClusterIngress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<Oidc>,
}

impl Extensions {
    pub fn is_empty(&self) -> bool {
        self.cluster_ingress.is_none() && self.oidc.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIngress {
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<IngressTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTls {
    /// Existing secret to use instead of the generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// PEM private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// PEM certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
}

impl IngressTls {
    /// A TLS secret is generated only when both key and certificate are
    /// given inline.
    pub fn has_inline_pair(&self) -> bool {
        self.key.is_some() && self.cert.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Oidc {
    pub provider_url: String,

    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,

    pub redirect_url: String,

    pub base_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject_claim: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_secure_paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_paths: Vec<String>,
}

// =============================================================================
// Token service
// =============================================================================

/// Which traffic directions the token service intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterceptMode {
    #[default]
    Any,
    Inbound,
    Outbound,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaPolicy {
    pub key: String,
    pub policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenServiceSpec {
    /// Labels of the pods whose traffic is intercepted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Name of the owning cell or composite instance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_name: String,

    #[serde(default)]
    pub intercept_mode: InterceptMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opa: Vec<OpaPolicy>,

    #[serde(default)]
    pub composite: bool,
}

/// The token service section of a Cell or Composite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenServiceTemplate {
    #[serde(default)]
    pub intercept_mode: InterceptMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opa: Vec<OpaPolicy>,
}

// =============================================================================
// Cell and Composite
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayTemplate {
    #[serde(default)]
    pub spec: GatewaySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    #[serde(default)]
    pub gateway: GatewayTemplate,

    #[serde(default)]
    pub components: Vec<ComponentTemplate>,

    #[serde(default)]
    pub sts: TokenServiceTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeSpec {
    #[serde(default)]
    pub components: Vec<ComponentTemplate>,

    #[serde(default)]
    pub sts: TokenServiceTemplate,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_job_with_ports_is_not_exposed() {
        let template: ComponentTemplate = serde_json::from_value(json!({
            "metadata": {"name": "migrate"},
            "spec": {"type": "Job", "ports": [{"port": 80, "targetPort": 8080}]}
        }))
        .unwrap();
        assert!(!template.spec.has_service());
        assert!(!template.is_exposed());
    }

    #[test]
    fn test_component_defaults() {
        let spec: ComponentSpec = serde_json::from_value(json!({
            "template": {"containers": [{"name": "main", "image": "employee:1.0"}]},
            "ports": [{"port": 80, "targetPort": 8080}]
        }))
        .unwrap();

        assert_eq!(spec.workload_type, WorkloadType::Deployment);
        assert_eq!(spec.ports[0].protocol, Protocol::Http);
        assert_eq!(spec.ports[0].service_port_name(), "http-80");
        assert!(spec.hpa().is_none());
    }

    #[test]
    fn test_kpa_takes_precedence_over_hpa() {
        let spec: ComponentSpec = serde_json::from_value(json!({
            "scalingPolicy": {
                "hpa": {"maxReplicas": 5},
                "kpa": {"maxReplicas": 3, "concurrency": 10}
            }
        }))
        .unwrap();
        assert!(spec.kpa().is_some());
        assert!(spec.hpa().is_none());

        let job = ComponentSpec {
            workload_type: WorkloadType::Job,
            ..spec
        };
        assert!(job.kpa().is_none());
        assert!(job.hpa().is_none());
    }

    #[test]
    fn test_protocol_wire_names() {
        let mapping: PortMapping =
            serde_json::from_value(json!({"name": "api", "protocol": "GRPC", "port": 50051, "targetPort": 50051}))
                .unwrap();
        assert_eq!(mapping.protocol, Protocol::Grpc);
        assert_eq!(mapping.service_port_name(), "grpc-api");
    }

    #[test]
    fn test_cell_spec_reserializes_stably() {
        let raw = json!({
            "gateway": {"spec": {"ingress": {"http": [
                {"context": "/hr", "destination": {"host": "hr", "port": 8080}, "global": false, "authenticate": false}
            ]}}},
            "components": [
                {"metadata": {"name": "hr"}, "spec": {"type": "Deployment", "scalingPolicy": {}, "ports": [
                    {"protocol": "HTTP", "port": 8080, "targetPort": 8080}
                ]}}
            ],
            "sts": {"interceptMode": "Any"}
        });
        let spec: CellSpec = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&spec).unwrap(), raw);
    }
}
