//! Deterministic child names and the labels that tie children together.
//!
//! Every child name is a pure function of the parent name (plus a template
//! name for multi-instance children). Children are never located by search.

/// Separator between an instance name and a nested parent's template name.
pub const SEPARATOR: &str = "--";

/// Well-known labels.
pub mod labels {
    pub const CELL: &str = "mesh.cellery.io/cell";
    pub const COMPOSITE: &str = "mesh.cellery.io/composite";
    pub const COMPONENT: &str = "mesh.cellery.io/component";
    pub const GATEWAY: &str = "mesh.cellery.io/gateway";
    pub const TOKEN_SERVICE: &str = "mesh.cellery.io/sts";
}

/// Well-known annotations.
pub mod annotations {
    /// Hash of mounted configuration; a change rolls the pods.
    pub const CONFIG_HASH: &str = "mesh.cellery.io/config-hash";
    pub const SIDECAR_INJECT: &str = "sidecar.istio.io/inject";
}

/// Component template names a Cell cannot use.
pub const RESERVED_COMPONENT_NAMES: [&str; 2] = ["gateway", "sts"];

// Nested parents of a Cell or Composite.

pub fn instance_child(instance: &str, template: &str) -> String {
    format!("{instance}{SEPARATOR}{template}")
}

pub fn cell_gateway(cell: &str) -> String {
    instance_child(cell, "gateway")
}

pub fn token_service(instance: &str) -> String {
    instance_child(instance, "sts")
}

pub fn instance_secret(instance: &str) -> String {
    instance_child(instance, "secret")
}

pub fn network_policy(cell: &str) -> String {
    instance_child(cell, "network")
}

pub fn routing_rule(instance: &str) -> String {
    instance_child(instance, "vs")
}

// Children of a Component, Gateway or TokenService.

pub fn service(parent: &str) -> String {
    format!("{parent}-service")
}

pub fn deployment(parent: &str) -> String {
    format!("{parent}-deployment")
}

pub fn stateful_set(component: &str) -> String {
    format!("{component}-statefulset")
}

pub fn job(component: &str) -> String {
    format!("{component}-job")
}

pub fn autoscaler(component: &str) -> String {
    format!("{component}-hpa")
}

pub fn serving(component: &str) -> String {
    format!("{component}-serving")
}

/// ConfigMaps, Secrets and shared claims of a component.
pub fn component_resource(component: &str, template: &str) -> String {
    format!("{component}-{template}")
}

pub fn gateway_virtual_service(gateway: &str) -> String {
    format!("{gateway}-vs")
}

pub fn gateway_ingress(gateway: &str) -> String {
    format!("{gateway}-ingress")
}

pub fn gateway_tls_secret(gateway: &str) -> String {
    format!("{gateway}-tls-secret")
}

pub fn gateway_oidc_filter(gateway: &str) -> String {
    format!("{gateway}-oidc")
}

pub fn sts_config(sts: &str) -> String {
    format!("{sts}-config")
}

pub fn sts_policy(sts: &str) -> String {
    format!("{sts}-policy")
}

pub fn sts_envoy_filter(sts: &str) -> String {
    format!("{sts}-envoyfilter")
}

// Hosts other instances reach.

/// Host of a Cell instance's gateway.
pub fn cell_gateway_host(instance: &str) -> String {
    service(&cell_gateway(instance))
}

/// Host of one component of a Cell or Composite instance.
pub fn component_host(instance: &str, component: &str) -> String {
    service(&instance_child(instance, component))
}
