//! Object model shared by the store seam and the reconcilers.
//!
//! Objects are kept deliberately untyped below the metadata: the body is the
//! JSON content of the resource without `apiVersion`, `kind`, `metadata` and
//! `status`. Typed desired content is produced by child descriptors and
//! serialized into the body.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// API group of the mesh parent kinds.
pub const MESH_GROUP: &str = "mesh.cellery.io";

/// API version of the mesh parent kinds.
pub const MESH_VERSION: &str = "v1alpha2";

/// Every resource kind the controller reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    // Mesh parents (and children of Cell/Composite).
    Cell,
    Composite,
    Component,
    Gateway,
    TokenService,

    // Core
    Service,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,

    // Workloads
    Deployment,
    StatefulSet,
    Job,
    HorizontalPodAutoscaler,

    // Networking
    NetworkPolicy,
    Ingress,

    // Knative serving
    ServingConfiguration,

    // Istio
    VirtualService,
    IstioGateway,
    EnvoyFilter,
}

impl ResourceKind {
    /// All kinds, parents first.
    pub const ALL: [ResourceKind; 19] = [
        Self::Cell,
        Self::Composite,
        Self::Component,
        Self::Gateway,
        Self::TokenService,
        Self::Service,
        Self::ConfigMap,
        Self::Secret,
        Self::PersistentVolumeClaim,
        Self::Deployment,
        Self::StatefulSet,
        Self::Job,
        Self::HorizontalPodAutoscaler,
        Self::NetworkPolicy,
        Self::Ingress,
        Self::ServingConfiguration,
        Self::VirtualService,
        Self::IstioGateway,
        Self::EnvoyFilter,
    ];

    /// Unique label, used for display and status bookkeeping keys.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cell => "Cell",
            Self::Composite => "Composite",
            Self::Component => "Component",
            Self::Gateway => "Gateway",
            Self::TokenService => "TokenService",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::Job => "Job",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::Ingress => "Ingress",
            Self::ServingConfiguration => "ServingConfiguration",
            Self::VirtualService => "VirtualService",
            Self::IstioGateway => "IstioGateway",
            Self::EnvoyFilter => "EnvoyFilter",
        }
    }

    /// Kind as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IstioGateway => "Gateway",
            Self::ServingConfiguration => "Configuration",
            other => other.label(),
        }
    }

    /// API group; empty for the core group.
    pub fn group(&self) -> &'static str {
        match self {
            Self::Cell | Self::Composite | Self::Component | Self::Gateway | Self::TokenService => {
                MESH_GROUP
            }
            Self::Service | Self::ConfigMap | Self::Secret | Self::PersistentVolumeClaim => "",
            Self::Deployment | Self::StatefulSet => "apps",
            Self::Job => "batch",
            Self::HorizontalPodAutoscaler => "autoscaling",
            Self::NetworkPolicy | Self::Ingress => "networking.k8s.io",
            Self::ServingConfiguration => "serving.knative.dev",
            Self::VirtualService | Self::IstioGateway | Self::EnvoyFilter => "networking.istio.io",
        }
    }

    /// API version within the group.
    pub fn version(&self) -> &'static str {
        match self {
            Self::Cell | Self::Composite | Self::Component | Self::Gateway | Self::TokenService => {
                MESH_VERSION
            }
            Self::HorizontalPodAutoscaler => "v2",
            Self::VirtualService | Self::IstioGateway | Self::EnvoyFilter => "v1alpha3",
            _ => "v1",
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        match self.group() {
            "" => self.version().to_string(),
            group => format!("{}/{}", group, self.version()),
        }
    }

    /// Plural resource name used in API paths.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Cell => "cells",
            Self::Composite => "composites",
            Self::Component => "components",
            Self::Gateway => "gateways",
            Self::TokenService => "tokenservices",
            Self::Service => "services",
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::Deployment => "deployments",
            Self::StatefulSet => "statefulsets",
            Self::Job => "jobs",
            Self::HorizontalPodAutoscaler => "horizontalpodautoscalers",
            Self::NetworkPolicy => "networkpolicies",
            Self::Ingress => "ingresses",
            Self::ServingConfiguration => "configurations",
            Self::VirtualService => "virtualservices",
            Self::IstioGateway => "gateways",
            Self::EnvoyFilter => "envoyfilters",
        }
    }

    /// Returns true for the mesh parent kinds.
    pub fn is_mesh(&self) -> bool {
        self.group() == MESH_GROUP
    }

    /// Resolve a wire `(apiVersion, kind)` pair back to a kind.
    pub fn from_api(api_version: &str, kind: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.kind() == kind && k.api_version() == api_version)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Namespaced name of an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from a child to the parent that controls it.
///
/// Ownership is decided by plain equality: a child is owned iff its link
/// equals the parent's link, uid included. A same-named parent that was
/// deleted and recreated does not own the old children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerLink {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: String,
}

/// Metadata carried by every object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    /// Server-assigned identity.
    #[serde(default)]
    pub uid: String,

    /// Server-maintained counter bumped on every accepted content change.
    #[serde(default)]
    pub generation: i64,

    /// Opaque optimistic-concurrency token.
    #[serde(default)]
    pub resource_version: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Controlling owner, if any.
    #[serde(default)]
    pub owner: Option<OwnerLink>,

    /// Owner references set by others, written back unchanged.
    #[serde(default)]
    pub other_owners: Vec<ForeignOwner>,

    /// Finalizers, written back unchanged.
    #[serde(default)]
    pub finalizers: Vec<String>,

    /// Set by the server once deletion was requested. Read-only.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// An owner reference that is not this engine's owner link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignOwner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: Option<bool>,
    #[serde(default)]
    pub block_owner_deletion: Option<bool>,
}

/// A stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub kind: ResourceKind,

    pub meta: ObjectMeta,

    /// Resource content minus metadata and status (e.g. `{"spec": ...}` or
    /// `{"data": ...}`).
    #[serde(default)]
    pub body: Value,

    /// Status subresource content; `Null` when never written.
    #[serde(default)]
    pub status: Value,
}

impl Object {
    /// Creates an empty object of `kind` with the given name.
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            meta: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            body: Value::Object(serde_json::Map::new()),
            status: Value::Null,
        }
    }

    /// Sets the body, builder style.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Sets the controlling owner, builder style.
    pub fn with_owner(mut self, owner: OwnerLink) -> Self {
        self.meta.owner = Some(owner);
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.meta.namespace, &self.meta.name)
    }

    /// Returns true if `owner` is this object's controlling owner.
    pub fn is_owned_by(&self, owner: &OwnerLink) -> bool {
        self.meta.owner.as_ref() == Some(owner)
    }

    /// Returns true once deletion was requested but finalizers still hold the
    /// object.
    pub fn is_terminating(&self) -> bool {
        self.meta.deletion_timestamp.is_some()
    }

    /// The owner link a child of this object must carry.
    pub fn owner_link(&self) -> OwnerLink {
        OwnerLink {
            kind: self.kind,
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
        }
    }

    /// Looks up a status field by JSON pointer (e.g. `/availableReplicas`).
    pub fn status_field(&self, pointer: &str) -> Option<&Value> {
        self.status.pointer(pointer).filter(|v| !v.is_null())
    }

    /// Integer status field, `0` when absent.
    pub fn status_i64(&self, pointer: &str) -> i64 {
        self.status_field(pointer)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Looks up the `status` of a condition of the given type in
    /// `status.conditions`.
    pub fn condition_status(&self, condition_type: &str) -> Option<&str> {
        self.status_field("/conditions")?
            .as_array()?
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))?
            .get("status")
            .and_then(Value::as_str)
    }
}
