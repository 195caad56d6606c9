//! The five parent kinds.

use cellmesh_reconcile::ResourceKind;

use super::{Children, ParentController};
use crate::model::{
    AggregateState, Cell, CellSpec, Component, ComponentSpec, Composite, CompositeSpec,
    DependencyKind, Gateway, GatewaySpec, TokenService, TokenServiceSpec,
};
use crate::resources::{cell, component, composite, gateway, token_service};
use crate::routing::Caller;
use crate::state::MeshState;

#[derive(Debug, Clone, Copy, Default)]
pub struct CellController;

impl ParentController for CellController {
    type Spec = CellSpec;

    const KIND: ResourceKind = ResourceKind::Cell;

    fn children(&self, parent: &Cell, state: &MeshState) -> Children<CellSpec> {
        cell::children(parent, state)
    }

    fn caller(&self, parent: &Cell) -> Option<Caller> {
        Some(Caller {
            kind: DependencyKind::Cell,
            name: parent.name().to_string(),
        })
    }

    fn aggregate(&self, parent: &mut Cell) -> AggregateState {
        cell::aggregate(parent)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeController;

impl ParentController for CompositeController {
    type Spec = CompositeSpec;

    const KIND: ResourceKind = ResourceKind::Composite;

    fn children(&self, parent: &Composite, state: &MeshState) -> Children<CompositeSpec> {
        composite::children(parent, state)
    }

    fn caller(&self, parent: &Composite) -> Option<Caller> {
        Some(Caller {
            kind: DependencyKind::Composite,
            name: parent.name().to_string(),
        })
    }

    fn aggregate(&self, parent: &mut Composite) -> AggregateState {
        composite::aggregate(parent)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentController;

impl ParentController for ComponentController {
    type Spec = ComponentSpec;

    const KIND: ResourceKind = ResourceKind::Component;

    fn children(&self, parent: &Component, _state: &MeshState) -> Children<ComponentSpec> {
        component::children(parent)
    }

    fn aggregate(&self, parent: &mut Component) -> AggregateState {
        component::aggregate(parent)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayController;

impl ParentController for GatewayController {
    type Spec = GatewaySpec;

    const KIND: ResourceKind = ResourceKind::Gateway;

    fn children(&self, _parent: &Gateway, state: &MeshState) -> Children<GatewaySpec> {
        gateway::children(state)
    }

    fn aggregate(&self, parent: &mut Gateway) -> AggregateState {
        gateway::aggregate(parent)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenServiceController;

impl ParentController for TokenServiceController {
    type Spec = TokenServiceSpec;

    const KIND: ResourceKind = ResourceKind::TokenService;

    fn children(&self, parent: &TokenService, state: &MeshState) -> Children<TokenServiceSpec> {
        token_service::children(parent, state)
    }

    fn aggregate(&self, parent: &mut TokenService) -> AggregateState {
        token_service::aggregate(parent)
    }
}
