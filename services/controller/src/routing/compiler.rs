//! Dependency routing compiler.
//!
//! Turns a caller's resolved dependencies into one routing rule. Every
//! dependency host gets the same predicate pattern:
//!
//! - two canary lanes keyed on the `x-instance-id` header (`"1"` and `"2"`),
//!   each routed to the same destination, so a later canary step can rewrite
//!   one lane independently;
//! - one fallback predicate matching on authority and caller identity only.
//!
//! All predicates pin the caller through its identity label, so the rule only
//! ever applies to the caller's own traffic.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::DependencyKind;
use crate::naming::{self, labels};

/// Header the canary lanes match on.
pub const INSTANCE_ID_HEADER: &str = "x-instance-id";

/// Header values of the two canary lanes.
pub const CANARY_LANES: [&str; 2] = ["1", "2"];

/// The instance a rule is compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub kind: DependencyKind,
    pub name: String,
}

impl Caller {
    /// Label pinning traffic to the caller's pods.
    pub fn source_labels(&self) -> BTreeMap<String, String> {
        let key = match self.kind {
            DependencyKind::Cell => labels::CELL,
            DependencyKind::Composite => labels::COMPOSITE,
        };
        BTreeMap::from([(key.to_string(), self.name.clone())])
    }
}

/// A dependency with the information needed to route to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDependency {
    /// Reached through the instance gateway.
    Cell { instance: String },
    /// Reached on each exposed component.
    Composite {
        instance: String,
        components: Vec<String>,
    },
}

impl ResolvedDependency {
    /// Hosts this dependency is reachable on, in declaration order.
    pub fn hosts(&self) -> Vec<String> {
        match self {
            Self::Cell { instance } => vec![naming::cell_gateway_host(instance)],
            Self::Composite {
                instance,
                components,
            } => components
                .iter()
                .map(|component| naming::component_host(instance, component))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: String,
    pub exact: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPredicate {
    pub authority_regex: String,
    pub header: Option<HeaderMatch>,
    pub source_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub predicate: MatchPredicate,
    pub destination: Destination,
}

/// Compiled routing rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingRule {
    /// De-duplicated, in first-seen order.
    pub hosts: Vec<String>,
    pub routes: Vec<Route>,
}

impl RoutingRule {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Anchored authority match tolerating a `:port` suffix.
pub fn authority_regex(host: &str) -> String {
    format!(r"^({host})(\S*)$")
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingCompiler {
    /// Emit the two canary lanes before each fallback.
    pub canary_lanes: bool,
}

impl Default for RoutingCompiler {
    fn default() -> Self {
        Self { canary_lanes: true }
    }
}

impl RoutingCompiler {
    pub fn new(canary_lanes: bool) -> Self {
        Self { canary_lanes }
    }

    /// Compile the rule for `caller`. Hosts reached through more than one
    /// dependency are routed once.
    pub fn compile(&self, caller: &Caller, dependencies: &[ResolvedDependency]) -> RoutingRule {
        let source_labels = caller.source_labels();
        let mut seen = BTreeSet::new();
        let mut rule = RoutingRule::default();

        for host in dependencies.iter().flat_map(ResolvedDependency::hosts) {
            if !seen.insert(host.clone()) {
                continue;
            }
            self.routes_for(&host, &source_labels, &mut rule.routes);
            rule.hosts.push(host);
        }
        rule
    }

    fn routes_for(&self, host: &str, source_labels: &BTreeMap<String, String>, routes: &mut Vec<Route>) {
        let destination = Destination {
            host: host.to_string(),
            port: None,
        };
        let predicate = |header: Option<HeaderMatch>| MatchPredicate {
            authority_regex: authority_regex(host),
            header,
            source_labels: source_labels.clone(),
        };

        if self.canary_lanes {
            for lane in CANARY_LANES {
                routes.push(Route {
                    predicate: predicate(Some(HeaderMatch {
                        name: INSTANCE_ID_HEADER.to_string(),
                        exact: lane.to_string(),
                    })),
                    destination: destination.clone(),
                });
            }
        }
        routes.push(Route {
            predicate: predicate(None),
            destination,
        });
    }
}
