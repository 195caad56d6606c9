//! Rendering a routing rule as a VirtualService child.

use cellmesh_reconcile::{ChildDescriptor, Desired, FieldSet, ReconcileError, ResourceKind, Stage};
use serde_json::{json, Map, Value};

use super::compiler::{Caller, Route, RoutingRule};
use crate::model::ParentInstance;
use crate::naming;

/// Gateway name that binds a VirtualService to sidecars.
pub const MESH_GATEWAY: &str = "mesh";

/// Render the VirtualService spec for a rule.
pub fn virtual_service_spec(rule: &RoutingRule) -> Value {
    json!({
        "hosts": rule.hosts,
        "gateways": [MESH_GATEWAY],
        "http": rule.routes.iter().map(http_route).collect::<Vec<_>>(),
    })
}

fn http_route(route: &Route) -> Value {
    let mut condition = Map::new();
    condition.insert(
        "authority".to_string(),
        json!({"regex": route.predicate.authority_regex}),
    );
    if let Some(header) = &route.predicate.header {
        condition.insert(
            "headers".to_string(),
            json!({header.name.clone(): {"exact": header.exact}}),
        );
    }
    condition.insert(
        "sourceLabels".to_string(),
        json!(route.predicate.source_labels),
    );

    let mut destination = json!({"host": route.destination.host});
    if let Some(port) = route.destination.port {
        destination["port"] = json!({"number": port});
    }

    json!({
        "match": [Value::Object(condition)],
        "route": [{"destination": destination}],
    })
}

/// The dependency routing rule of a Cell or Composite.
///
/// Required only while the rule routes at least one host; an empty rule
/// deletes any rule left from an earlier pass.
pub struct RoutingChild {
    caller: Caller,
    rule: RoutingRule,
}

impl RoutingChild {
    pub fn new(caller: Caller, rule: RoutingRule) -> Self {
        Self { caller, rule }
    }
}

impl<S: Send + Sync> ChildDescriptor<ParentInstance<S>> for RoutingChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualService
    }

    fn stage(&self) -> Stage {
        Stage::Routing
    }

    fn name(&self, parent: &ParentInstance<S>) -> String {
        naming::routing_rule(parent.name())
    }

    fn required(&self, _parent: &ParentInstance<S>) -> bool {
        !self.rule.is_empty()
    }

    fn build(&self, _parent: &ParentInstance<S>) -> Result<Desired, ReconcileError> {
        Ok(Desired::new(json!({"spec": virtual_service_spec(&self.rule)}))
            .with_labels(self.caller.source_labels()))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

#[cfg(test)]
mod tests {
    use super::super::compiler::{ResolvedDependency, RoutingCompiler};
    use super::*;
    use crate::model::DependencyKind;

    #[test]
    fn test_render_single_dependency() {
        let caller = Caller {
            kind: DependencyKind::Cell,
            name: "hr".to_string(),
        };
        let rule = RoutingCompiler::default().compile(
            &caller,
            &[ResolvedDependency::Cell {
                instance: "employee".to_string(),
            }],
        );

        let spec = virtual_service_spec(&rule);
        assert_eq!(spec["hosts"], json!(["employee--gateway-service"]));
        assert_eq!(spec["gateways"], json!(["mesh"]));

        let http = spec["http"].as_array().unwrap();
        assert_eq!(http.len(), 3);
        assert_eq!(
            http[0]["match"][0],
            json!({
                "authority": {"regex": r"^(employee--gateway-service)(\S*)$"},
                "headers": {"x-instance-id": {"exact": "1"}},
                "sourceLabels": {"mesh.cellery.io/cell": "hr"}
            })
        );
        assert!(http[2]["match"][0].get("headers").is_none());
        assert_eq!(
            http[2]["route"],
            json!([{"destination": {"host": "employee--gateway-service"}}])
        );
    }
}
