//! Dependency declarations.
//!
//! Cells and Composites declare the instances they call in an annotation
//! holding a JSON array of `{org, name, version, instance, kind}`. Only
//! `instance` and `kind` drive routing; the other fields pass through.

use std::collections::BTreeMap;

use cellmesh_reconcile::ReconcileError;
use serde::{Deserialize, Serialize};

/// Dependency annotation on a Cell.
pub const CELL_DEPENDENCIES_ANNOTATION: &str = "mesh.cellery.io/cell-dependencies";

/// Dependency annotation on a Composite.
pub const COMPOSITE_DEPENDENCIES_ANNOTATION: &str = "mesh.cellery.io/composite-dependencies";

/// Kind of a dependency target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Reached through its gateway.
    Cell,
    /// Reached directly on each exposed component.
    Composite,
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub org: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    /// Addressable instance name.
    pub instance: String,

    pub kind: DependencyKind,
}

/// Parse the dependency annotation `key`. A missing or blank annotation is
/// an empty declaration.
pub fn parse_dependencies(
    annotations: &BTreeMap<String, String>,
    key: &str,
) -> Result<Vec<Dependency>, ReconcileError> {
    let Some(raw) = annotations.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    let dependencies: Vec<Dependency> = serde_json::from_str(raw)
        .map_err(|e| ReconcileError::InvalidSpec(format!("annotation {key}: {e}")))?;

    if let Some(empty) = dependencies.iter().find(|d| d.instance.is_empty()) {
        return Err(ReconcileError::InvalidSpec(format!(
            "annotation {key}: dependency {}/{} has no instance name",
            empty.org, empty.name
        )));
    }
    Ok(dependencies)
}
