//! [`Store`] backed by the cluster API.
//!
//! Every kind is addressed through `Api<DynamicObject>`, so the store needs no
//! typed bindings for the mesh, Knative or Istio resources.

use async_trait::async_trait;
use cellmesh_reconcile::{
    ForeignOwner, Object, ObjectMeta, OwnerLink, Propagation, ResourceKind, Store, StoreError, StoreResult,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, PostParams};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Cluster-backed object store.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }
}

/// API resource descriptor for `kind`.
pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

#[async_trait]
impl Store for KubeStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> StoreResult<Option<Object>> {
        let found = self
            .api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))?;
        Ok(found.map(|obj| from_dynamic(kind, obj)))
    }

    async fn create(&self, object: &Object) -> StoreResult<Object> {
        let (kind, namespace, name) = identity(object);
        let created = self
            .api(kind, namespace)
            .create(&PostParams::default(), &to_dynamic(object))
            .await
            .map_err(|e| map_error(e, kind, namespace, name))?;
        debug!(kind = %kind, namespace, name, "Created object");
        Ok(from_dynamic(kind, created))
    }

    async fn update(&self, object: &Object) -> StoreResult<Object> {
        let (kind, namespace, name) = identity(object);
        let updated = self
            .api(kind, namespace)
            .replace(name, &PostParams::default(), &to_dynamic(object))
            .await
            .map_err(|e| map_error(e, kind, namespace, name))?;
        Ok(from_dynamic(kind, updated))
    }

    async fn update_status(&self, object: &Object) -> StoreResult<Object> {
        let (kind, namespace, name) = identity(object);
        let mut dynamic = to_dynamic(object);
        if let Value::Object(data) = &mut dynamic.data {
            data.insert("status".to_string(), object.status.clone());
        }
        let payload =
            serde_json::to_vec(&dynamic).map_err(|e| StoreError::Invalid(e.to_string()))?;

        let updated = self
            .api(kind, namespace)
            .replace_status(name, &PostParams::default(), payload)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))?;
        Ok(from_dynamic(kind, updated))
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> StoreResult<()> {
        let params = match propagation {
            Propagation::Background => DeleteParams::background(),
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Orphan => DeleteParams::orphan(),
        };
        self.api(kind, namespace)
            .delete(name, &params)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))?;
        debug!(kind = %kind, namespace, name, propagation = propagation.as_str(), "Deleted object");
        Ok(())
    }
}

fn identity(object: &Object) -> (ResourceKind, &str, &str) {
    (object.kind, &object.meta.namespace, &object.meta.name)
}

// =============================================================================
// Conversion
// =============================================================================

/// Convert a wire object into the store model. The controlling owner
/// reference becomes the owner link when it names a known kind; every other
/// owner reference is kept verbatim.
pub fn from_dynamic(kind: ResourceKind, obj: DynamicObject) -> Object {
    let mut body = obj.data;
    let status = match &mut body {
        Value::Object(data) => data.remove("status").unwrap_or(Value::Null),
        _ => Value::Null,
    };
    let meta = obj.metadata;

    let mut owner = None;
    let mut other_owners = Vec::new();
    for reference in meta.owner_references.unwrap_or_default() {
        let link = (owner.is_none() && reference.controller == Some(true))
            .then(|| ResourceKind::from_api(&reference.api_version, &reference.kind))
            .flatten();
        match link {
            Some(kind) => {
                owner = Some(OwnerLink {
                    kind,
                    name: reference.name,
                    uid: reference.uid,
                })
            }
            None => other_owners.push(ForeignOwner {
                api_version: reference.api_version,
                kind: reference.kind,
                name: reference.name,
                uid: reference.uid,
                controller: reference.controller,
                block_owner_deletion: reference.block_owner_deletion,
            }),
        }
    }

    Object {
        kind,
        meta: ObjectMeta {
            name: meta.name.unwrap_or_default(),
            namespace: meta.namespace.unwrap_or_default(),
            uid: meta.uid.unwrap_or_default(),
            generation: meta.generation.unwrap_or_default(),
            resource_version: meta.resource_version.unwrap_or_default(),
            labels: meta.labels.unwrap_or_default(),
            annotations: meta.annotations.unwrap_or_default(),
            owner,
            other_owners,
            finalizers: meta.finalizers.unwrap_or_default(),
            deletion_timestamp: meta.deletion_timestamp.map(|t| t.0),
        },
        body,
        status,
    }
}

/// Convert a store object into its wire form, status excluded.
///
/// Updates are full writes, so everything the live object carried outside
/// the mutable fields must come back here: finalizers and foreign owner
/// references included.
pub fn to_dynamic(object: &Object) -> DynamicObject {
    let mut dynamic = DynamicObject::new(&object.meta.name, &api_resource(object.kind))
        .within(&object.meta.namespace);

    let meta = &mut dynamic.metadata;
    if !object.meta.labels.is_empty() {
        meta.labels = Some(object.meta.labels.clone());
    }
    if !object.meta.annotations.is_empty() {
        meta.annotations = Some(object.meta.annotations.clone());
    }
    if !object.meta.resource_version.is_empty() {
        meta.resource_version = Some(object.meta.resource_version.clone());
    }
    if !object.meta.uid.is_empty() {
        meta.uid = Some(object.meta.uid.clone());
    }
    if !object.meta.finalizers.is_empty() {
        meta.finalizers = Some(object.meta.finalizers.clone());
    }

    let references: Vec<OwnerReference> = object
        .meta
        .owner
        .iter()
        .map(|owner| OwnerReference {
            api_version: owner.kind.api_version(),
            kind: owner.kind.kind().to_string(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
        .chain(object.meta.other_owners.iter().map(|other| OwnerReference {
            api_version: other.api_version.clone(),
            kind: other.kind.clone(),
            name: other.name.clone(),
            uid: other.uid.clone(),
            controller: other.controller,
            block_owner_deletion: other.block_owner_deletion,
        }))
        .collect();
    if !references.is_empty() {
        meta.owner_references = Some(references);
    }

    dynamic.data = object.body.clone();
    dynamic
}

/// Map an API error onto the store taxonomy.
fn map_error(err: kube::Error, kind: ResourceKind, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            409 => StoreError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: resp.message,
            },
            400 | 422 => StoreError::Invalid(resp.message),
            _ => StoreError::Transient(resp.message),
        },
        other => StoreError::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::core::ErrorResponse;
    use serde_json::json;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_api_resource_for_renamed_kinds() {
        let ar = api_resource(ResourceKind::IstioGateway);
        assert_eq!(ar.group, "networking.istio.io");
        assert_eq!(ar.kind, "Gateway");
        assert_eq!(ar.plural, "gateways");

        let ar = api_resource(ResourceKind::ConfigMap);
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "configmaps");
    }

    #[test]
    fn test_error_mapping() {
        let kind = ResourceKind::Service;
        assert!(map_error(api_error(404, "NotFound"), kind, "ns", "a").is_not_found());
        assert!(matches!(
            map_error(api_error(409, "AlreadyExists"), kind, "ns", "a"),
            StoreError::AlreadyExists { .. }
        ));
        assert!(matches!(
            map_error(api_error(409, "Conflict"), kind, "ns", "a"),
            StoreError::Conflict { .. }
        ));
        assert!(matches!(
            map_error(api_error(422, "Invalid"), kind, "ns", "a"),
            StoreError::Invalid(_)
        ));
        assert!(map_error(api_error(503, "ServiceUnavailable"), kind, "ns", "a").is_transient());
    }

    #[test]
    fn test_wire_conversion_keeps_owner_and_splits_status() {
        let mut object = Object::new(ResourceKind::Deployment, "default", "hr--employee-deployment")
            .with_body(json!({"spec": {"replicas": 1}}))
            .with_owner(OwnerLink {
                kind: ResourceKind::Component,
                name: "hr--employee".to_string(),
                uid: "uid-1".to_string(),
            });
        object.meta.labels = BTreeMap::from([("app".to_string(), "employee".to_string())]);
        object.meta.resource_version = "7".to_string();

        let mut dynamic = to_dynamic(&object);
        let owners = dynamic.metadata.owner_references.clone().unwrap();
        assert_eq!(owners[0].api_version, "mesh.cellery.io/v1alpha2");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(dynamic.metadata.resource_version.as_deref(), Some("7"));

        dynamic.data["status"] = json!({"availableReplicas": 1});
        let back = from_dynamic(ResourceKind::Deployment, dynamic);
        assert_eq!(back.meta.owner, object.meta.owner);
        assert_eq!(back.meta.labels, object.meta.labels);
        assert_eq!(back.body, json!({"spec": {"replicas": 1}}));
        assert_eq!(back.status, json!({"availableReplicas": 1}));
    }

    #[test]
    fn test_update_keeps_finalizers_and_foreign_owners() {
        let mut live = DynamicObject::new("hr--employee-data", &api_resource(ResourceKind::PersistentVolumeClaim))
            .within("default");
        live.metadata.uid = Some("pvc-uid".to_string());
        live.metadata.resource_version = Some("12".to_string());
        live.metadata.finalizers = Some(vec!["kubernetes.io/pvc-protection".to_string()]);
        live.metadata.owner_references = Some(vec![
            OwnerReference {
                api_version: "mesh.cellery.io/v1alpha2".to_string(),
                kind: "Component".to_string(),
                name: "hr--employee".to_string(),
                uid: "uid-1".to_string(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            },
            OwnerReference {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                name: "backup-schedule".to_string(),
                uid: "uid-2".to_string(),
                controller: None,
                block_owner_deletion: None,
            },
        ]);
        live.data = json!({"spec": {"resources": {"requests": {"storage": "1Gi"}}}});

        let mut object = from_dynamic(ResourceKind::PersistentVolumeClaim, live.clone());
        assert_eq!(object.meta.owner.as_ref().map(|o| o.uid.as_str()), Some("uid-1"));
        assert_eq!(object.meta.other_owners.len(), 1);
        object.meta.labels.insert("app".to_string(), "employee".to_string());

        let written = to_dynamic(&object);
        assert_eq!(written.metadata.finalizers, live.metadata.finalizers);
        assert_eq!(written.metadata.owner_references, live.metadata.owner_references);
        assert_eq!(written.metadata.uid.as_deref(), Some("pvc-uid"));
        assert_eq!(written.metadata.resource_version.as_deref(), Some("12"));
    }

    #[test]
    fn test_deletion_timestamp_marks_terminating() {
        let mut live = DynamicObject::new("hr--employee-job", &api_resource(ResourceKind::Job)).within("default");
        live.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        live.data = json!({"spec": {}});

        assert!(from_dynamic(ResourceKind::Job, live).is_terminating());
    }
}
