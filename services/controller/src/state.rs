//! Mesh-wide state shared by every orchestrator.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Result;
use cellmesh_reconcile::Store;
use tracing::info;

use crate::config::{load_mesh, Config, MeshConfig, MeshSecret};
use crate::routing::RoutingCompiler;

/// Shared mesh state.
///
/// Cloning is cheap; all orchestrators hold the same inner value.
#[derive(Clone)]
pub struct MeshState {
    inner: Arc<MeshStateInner>,
}

struct MeshStateInner {
    mesh: MeshConfig,
    secret: Option<MeshSecret>,
    routing: RoutingCompiler,
}

impl MeshState {
    pub fn new(mesh: MeshConfig, secret: Option<MeshSecret>, routing: RoutingCompiler) -> Self {
        Self {
            inner: Arc::new(MeshStateInner {
                mesh,
                secret,
                routing,
            }),
        }
    }

    /// Images and token service defaults.
    pub fn mesh(&self) -> &MeshConfig {
        &self.inner.mesh
    }

    /// Signing bundle, if the mesh Secret exists.
    pub fn secret(&self) -> Option<&MeshSecret> {
        self.inner.secret.as_ref()
    }

    pub fn routing(&self) -> &RoutingCompiler {
        &self.inner.routing
    }

    /// Same routing, new mesh configuration and signing bundle.
    pub fn with_mesh(&self, mesh: MeshConfig, secret: Option<MeshSecret>) -> Self {
        Self::new(mesh, secret, self.inner.routing)
    }
}

impl Default for MeshState {
    fn default() -> Self {
        Self::new(MeshConfig::default(), None, RoutingCompiler::default())
    }
}

/// The current [`MeshState`], replaced when the mesh ConfigMap or Secret
/// changes. A pass works on one snapshot from start to end.
#[derive(Clone)]
pub struct SharedMeshState {
    current: Arc<RwLock<MeshState>>,
}

impl SharedMeshState {
    pub fn new(state: MeshState) -> Self {
        Self {
            current: Arc::new(RwLock::new(state)),
        }
    }

    pub fn snapshot(&self) -> MeshState {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, state: MeshState) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Re-read the mesh ConfigMap and Secret. Returns true if either changed,
    /// in which case every parent needs another pass.
    pub async fn reload(&self, store: &dyn Store, config: &Config) -> Result<bool> {
        let (mesh, secret) = load_mesh(store, config).await?;
        let current = self.snapshot();
        if current.mesh() == &mesh && current.secret() == secret.as_ref() {
            return Ok(false);
        }

        info!(
            gateway_image = %mesh.gateway_image,
            sts_image = %mesh.sts_image,
            has_secret = secret.is_some(),
            "Mesh configuration changed"
        );
        self.replace(current.with_mesh(mesh, secret));
        Ok(true)
    }
}

impl From<MeshState> for SharedMeshState {
    fn from(state: MeshState) -> Self {
        Self::new(state)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cellmesh_reconcile::{Object, ResourceKind};
    use cellmesh_testing::MemoryStore;
    use serde_json::json;

    use super::*;

    fn config() -> Config {
        Config {
            namespace: "cellery-system".to_string(),
            config_name: "mesh-config".to_string(),
            secret_name: "mesh-secret".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            resync_interval: Duration::from_secs(300),
            canary_lanes: true,
        }
    }

    #[tokio::test]
    async fn test_reload_picks_up_changed_config_map() {
        let store = MemoryStore::new();
        store.insert(
            Object::new(ResourceKind::ConfigMap, "cellery-system", "mesh-config")
                .with_body(json!({"data": {"cell-gateway-image": "registry/gateway:1.0"}})),
        );
        let shared = SharedMeshState::new(MeshState::new(
            MeshConfig::default(),
            None,
            RoutingCompiler::new(false),
        ));

        assert!(shared.reload(&store, &config()).await.unwrap());
        assert_eq!(shared.snapshot().mesh().gateway_image, "registry/gateway:1.0");
        assert!(!shared.reload(&store, &config()).await.unwrap());

        store.edit(ResourceKind::ConfigMap, "cellery-system", "mesh-config", |obj| {
            obj.body["data"]["cell-gateway-image"] = json!("registry/gateway:1.1");
        });
        let before = shared.snapshot();
        assert!(shared.reload(&store, &config()).await.unwrap());
        assert_eq!(shared.snapshot().mesh().gateway_image, "registry/gateway:1.1");
        // Snapshots taken earlier are unaffected, and routing is kept.
        assert_eq!(before.mesh().gateway_image, "registry/gateway:1.0");
        assert!(!shared.snapshot().routing().canary_lanes);
    }
}
