//! Pod spec preparation for component workloads.

use serde_json::{json, Map, Value};

use crate::model::ComponentSpec;
use crate::naming;

/// The component's pod spec with container ports added from the port
/// mappings and volume sources pointed at the generated ConfigMaps, Secrets
/// and shared claims.
pub fn component_pod_spec(component: &str, spec: &ComponentSpec) -> Value {
    let mut pod = match &spec.template {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    add_container_ports(&mut pod, spec);
    rewrite_volumes(&mut pod, component, spec);
    Value::Object(pod)
}

fn add_container_ports(pod: &mut Map<String, Value>, spec: &ComponentSpec) {
    let Some(Value::Array(containers)) = pod.get_mut("containers") else {
        return;
    };

    for mapping in &spec.ports {
        let index = if mapping.target_container.is_empty() {
            Some(0)
        } else {
            containers
                .iter()
                .position(|c| c.get("name").and_then(Value::as_str) == Some(mapping.target_container.as_str()))
        };
        let Some(container) = index.and_then(|i| containers.get_mut(i)) else {
            continue;
        };
        let Some(container) = container.as_object_mut() else {
            continue;
        };

        let ports = container
            .entry("ports")
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(ports) = ports else {
            continue;
        };
        let declared = ports
            .iter()
            .any(|p| p.get("containerPort").and_then(Value::as_i64) == Some(i64::from(mapping.target_port)));
        if !declared {
            ports.push(json!({"containerPort": mapping.target_port}));
        }
    }
}

fn rewrite_volumes(pod: &mut Map<String, Value>, component: &str, spec: &ComponentSpec) {
    let Some(Value::Array(volumes)) = pod.get_mut("volumes") else {
        return;
    };

    for volume in volumes.iter_mut() {
        if let Some(name) = volume.pointer_mut("/configMap/name") {
            let declared = spec.configurations.iter().map(|c| c.metadata.name.as_str());
            rename(name, component, declared);
        }
        if let Some(name) = volume.pointer_mut("/secret/secretName") {
            let declared = spec.secrets.iter().map(|s| s.metadata.name.as_str());
            rename(name, component, declared);
        }
        if let Some(name) = volume.pointer_mut("/persistentVolumeClaim/claimName") {
            let declared = spec
                .volume_claims
                .iter()
                .filter(|c| c.shared)
                .map(|c| c.template.metadata.name.as_str());
            rename(name, component, declared);
        }
    }
}

/// Point `name` at the generated child if it names a declared template.
fn rename<'a>(name: &mut Value, component: &str, mut declared: impl Iterator<Item = &'a str>) {
    let Some(current) = name.as_str() else {
        return;
    };
    if declared.any(|d| d == current) {
        *name = Value::String(naming::component_resource(component, current));
    }
}
