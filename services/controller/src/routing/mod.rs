//! Inter-instance routing.
//!
//! A Cell or Composite that declares dependencies gets one VirtualService
//! routing its own traffic to the hosts of the instances it depends on.

mod compiler;
mod render;
mod resolve;

pub use compiler::{
    authority_regex, Caller, Destination, HeaderMatch, MatchPredicate, ResolvedDependency, Route,
    RoutingCompiler, RoutingRule, CANARY_LANES, INSTANCE_ID_HEADER,
};
pub use render::{virtual_service_spec, RoutingChild, MESH_GATEWAY};
pub use resolve::resolve_dependencies;
