//! Resolving declared dependencies against their own instances.

use cellmesh_events::{reasons, Event, EventRecorder, ObjectRef};
use cellmesh_reconcile::{ReconcileError, ResourceKind, Store};
use tracing::{debug, warn};

use super::compiler::ResolvedDependency;
use crate::model::{Composite, Dependency, DependencyKind};

/// Resolve each dependency to its routable endpoints.
///
/// Cells need no lookup: they are always reached through their gateway.
/// Composites are read to find their exposed components; a composite that
/// does not exist is skipped with a warning event, any other store failure
/// fails the whole resolution.
pub async fn resolve_dependencies(
    namespace: &str,
    dependencies: &[Dependency],
    store: &dyn Store,
    recorder: &dyn EventRecorder,
    regarding: &ObjectRef,
) -> Result<Vec<ResolvedDependency>, ReconcileError> {
    let mut resolved = Vec::with_capacity(dependencies.len());

    for dependency in dependencies {
        match dependency.kind {
            DependencyKind::Cell => resolved.push(ResolvedDependency::Cell {
                instance: dependency.instance.clone(),
            }),
            DependencyKind::Composite => {
                let Some(object) = store
                    .get(ResourceKind::Composite, namespace, &dependency.instance)
                    .await?
                else {
                    warn!(instance = %dependency.instance, "Composite dependency not found");
                    recorder.record(
                        regarding,
                        Event::warning(
                            reasons::DEPENDENCY_UNRESOLVED,
                            format!("Composite dependency {} not found", dependency.instance),
                        ),
                    );
                    continue;
                };

                let composite = Composite::from_object(&object)?;
                let components: Vec<String> = composite
                    .spec
                    .components
                    .iter()
                    .filter(|c| c.is_exposed())
                    .map(|c| c.metadata.name.clone())
                    .collect();
                debug!(
                    instance = %dependency.instance,
                    exposed = components.len(),
                    "Resolved composite dependency"
                );
                resolved.push(ResolvedDependency::Composite {
                    instance: dependency.instance.clone(),
                    components,
                });
            }
        }
    }

    Ok(resolved)
}
