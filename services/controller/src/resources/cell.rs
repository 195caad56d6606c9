//! Children of a Cell.
//!
//! On top of the instance children a Cell isolates its pods with a
//! NetworkPolicy and publishes selected components through its Gateway.

use std::collections::BTreeMap;

use cellmesh_reconcile::{ChildDescriptor, Desired, FieldSet, Object, ReconcileError, ResourceKind, Stage};
use serde_json::json;

use super::instance::{self, instance_labels, nested_state};
use crate::model::{AggregateState, Cell, GatewaySpec, RouteDestination};
use crate::naming::{self, labels};
use crate::state::MeshState;

/// Every child a cell may have, required or not. The routing rule is added
/// by the orchestrator.
pub fn children(cell: &Cell, state: &MeshState) -> Vec<Box<dyn ChildDescriptor<Cell>>> {
    let mut children: Vec<Box<dyn ChildDescriptor<Cell>>> =
        vec![Box::new(NetworkPolicyChild), Box::new(GatewayChild)];
    children.extend(instance::children(cell, state.secret()));
    children
}

/// Ready iff the gateway and every component are ready.
pub fn aggregate(cell: &mut Cell) -> AggregateState {
    let components_ready = instance::count_components(cell);
    let gateway_ready = cell
        .status
        .gateway_status
        .is_some_and(|s| s.is_ready());
    AggregateState::from_ready(components_ready && gateway_ready)
}

/// The cell's gateway spec with destinations naming a component rewritten
/// to that component's service host.
fn gateway_spec(cell: &Cell) -> GatewaySpec {
    let mut spec = cell.spec.gateway.spec.clone();
    let rewrite = |destination: &mut RouteDestination| {
        if cell
            .spec
            .components
            .iter()
            .any(|c| c.metadata.name == destination.host)
        {
            destination.host = naming::component_host(cell.name(), &destination.host);
        }
    };

    let ingress = &mut spec.ingress;
    ingress.http.iter_mut().for_each(|r| rewrite(&mut r.destination));
    ingress.grpc.iter_mut().for_each(|r| rewrite(&mut r.destination));
    ingress.tcp.iter_mut().for_each(|r| rewrite(&mut r.destination));
    spec
}

// =============================================================================
// Network
// =============================================================================

/// Admits traffic to the cell's workloads only from the cell's own pods.
/// The gateway pods stay reachable from outside.
struct NetworkPolicyChild;

impl ChildDescriptor<Cell> for NetworkPolicyChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::NetworkPolicy
    }

    fn stage(&self) -> Stage {
        Stage::Network
    }

    fn name(&self, parent: &Cell) -> String {
        naming::network_policy(parent.name())
    }

    fn required(&self, _parent: &Cell) -> bool {
        true
    }

    fn build(&self, parent: &Cell) -> Result<Desired, ReconcileError> {
        let cell_labels = BTreeMap::from([(labels::CELL.to_string(), parent.name().to_string())]);
        let cell_selector = json!({"matchLabels": cell_labels});
        let pod_selector = json!({
            "matchLabels": cell_labels,
            "matchExpressions": [{"key": labels::GATEWAY, "operator": "DoesNotExist"}],
        });

        Ok(Desired::new(json!({
            "spec": {
                "podSelector": pod_selector,
                "policyTypes": ["Ingress"],
                "ingress": [{"from": [{"podSelector": cell_selector}]}],
            }
        }))
        .with_labels(instance_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }
}

// =============================================================================
// Workload
// =============================================================================

struct GatewayChild;

impl ChildDescriptor<Cell> for GatewayChild {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Gateway
    }

    fn stage(&self) -> Stage {
        Stage::Workload
    }

    fn name(&self, parent: &Cell) -> String {
        naming::cell_gateway(parent.name())
    }

    fn required(&self, _parent: &Cell) -> bool {
        true
    }

    fn build(&self, parent: &Cell) -> Result<Desired, ReconcileError> {
        let spec = serde_json::to_value(gateway_spec(parent)).map_err(|e| {
            ReconcileError::InvalidSpec(format!("gateway of cell {}: {e}", parent.name()))
        })?;
        Ok(Desired::new(json!({"spec": spec})).with_labels(instance_labels(parent)))
    }

    fn mutable_fields(&self) -> FieldSet {
        FieldSet::new(["/spec"])
    }

    fn observe(&self, parent: &mut Cell, child: &Object) {
        parent.status.gateway_status = Some(nested_state(child));
    }

    fn forget(&self, parent: &mut Cell) {
        parent.status.gateway_status = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn cell(spec: Value) -> Cell {
        let object = Object::new(ResourceKind::Cell, "default", "hr").with_body(json!({"spec": spec}));
        Cell::from_object(&object).unwrap()
    }

    #[test]
    fn test_cell_children() {
        let c = cell(json!({"components": [{"metadata": {"name": "employee"}}]}));
        let names: Vec<(ResourceKind, String)> = children(&c, &MeshState::default())
            .iter()
            .filter(|child| child.required(&c))
            .map(|child| (child.kind(), child.name(&c)))
            .collect();

        assert_eq!(
            names,
            vec![
                (ResourceKind::NetworkPolicy, "hr--network".to_string()),
                (ResourceKind::Gateway, "hr--gateway".to_string()),
                (ResourceKind::TokenService, "hr--sts".to_string()),
                (ResourceKind::Component, "hr--employee".to_string()),
            ]
        );
    }

    #[test]
    fn test_gateway_hosts_are_rewritten() {
        let c = cell(json!({
            "gateway": {"spec": {"ingress": {
                "http": [
                    {"context": "employee", "destination": {"host": "employee", "port": 80}},
                    {"context": "ext", "destination": {"host": "api.example.com"}}
                ],
                "tcp": [{"port": 5432, "destination": {"host": "db"}}]
            }}},
            "components": [{"metadata": {"name": "employee"}}, {"metadata": {"name": "db"}}]
        }));

        let desired = GatewayChild.build(&c).unwrap();
        let ingress = &desired.body["spec"]["ingress"];
        assert_eq!(ingress["http"][0]["destination"]["host"], "hr--employee-service");
        assert_eq!(ingress["http"][1]["destination"]["host"], "api.example.com");
        assert_eq!(ingress["tcp"][0]["destination"]["host"], "hr--db-service");
    }

    #[test]
    fn test_network_policy_excludes_gateway_pods() {
        let c = cell(json!({}));
        let desired = NetworkPolicyChild.build(&c).unwrap();
        let spec = &desired.body["spec"];
        assert_eq!(spec["podSelector"]["matchLabels"], json!({"mesh.cellery.io/cell": "hr"}));
        assert_eq!(
            spec["podSelector"]["matchExpressions"][0]["key"],
            "mesh.cellery.io/gateway"
        );
        assert_eq!(
            spec["ingress"][0]["from"][0]["podSelector"],
            json!({"matchLabels": {"mesh.cellery.io/cell": "hr"}})
        );
    }

    #[test]
    fn test_aggregate_needs_gateway_and_components() {
        let mut c = cell(json!({"components": [{"metadata": {"name": "employee"}}]}));
        c.status
            .component_statuses
            .insert("employee".to_string(), AggregateState::Ready);
        assert_eq!(aggregate(&mut c), AggregateState::NotReady);

        c.status.gateway_status = Some(AggregateState::Ready);
        assert_eq!(aggregate(&mut c), AggregateState::Ready);
        assert_eq!(c.status.active_component_count, Some(1));
    }

    #[test]
    fn test_gateway_status_observed() {
        let mut c = cell(json!({}));
        let mut child = Object::new(ResourceKind::Gateway, "default", "hr--gateway");
        child.status = json!({"status": "NotReady"});
        GatewayChild.observe(&mut c, &child);
        assert_eq!(c.status.gateway_status, Some(AggregateState::NotReady));
    }
}
