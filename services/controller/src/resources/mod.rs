//! Child descriptors, one module per parent kind.
//!
//! Each descriptor is a small struct implementing
//! [`ChildDescriptor`](cellmesh_reconcile::ChildDescriptor) for one child kind
//! of one parent kind. Descriptors capture whatever mesh state they need when
//! the orchestrator lists them, so requirement and desired content stay pure
//! functions of the parent.

pub mod cell;
pub mod component;
pub mod composite;
pub mod gateway;
pub mod instance;
pub mod pod;
pub mod token_service;

use std::collections::BTreeMap;

use base64::Engine as _;
use serde_json::{json, Value};

use crate::model::ParentInstance;

/// The parent's own labels plus `key: value`.
pub(crate) fn labels_with<S>(parent: &ParentInstance<S>, key: &str, value: &str) -> BTreeMap<String, String> {
    let mut labels = parent.meta.labels.clone();
    labels.insert(key.to_string(), value.to_string());
    labels
}

pub(crate) fn base64_encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

/// EnvoyFilter patch inserting an external authorization filter ahead of the
/// router in the given listener context.
pub(crate) fn ext_authz_patch(context: &str, target: &str, stat_prefix: &str) -> Value {
    json!({
        "applyTo": "HTTP_FILTER",
        "match": {
            "context": context,
            "listener": {"filterChain": {"filter": {
                "name": "envoy.filters.network.http_connection_manager",
                "subFilter": {"name": "envoy.filters.http.router"}
            }}}
        },
        "patch": {
            "operation": "INSERT_BEFORE",
            "value": {
                "name": "envoy.filters.http.ext_authz",
                "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz",
                    "grpc_service": {
                        "google_grpc": {"target_uri": target, "stat_prefix": stat_prefix},
                        "timeout": "10s"
                    }
                }
            }
        }
    })
}
