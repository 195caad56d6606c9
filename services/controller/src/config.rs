use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use base64::Engine as _;
use cellmesh_reconcile::{Object, ResourceKind, Store};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the mesh ConfigMap and Secret.
    pub namespace: String,
    pub config_name: String,
    pub secret_name: String,
    pub log_level: String,
    pub log_json: bool,
    pub resync_interval: Duration,
    /// Emit the `x-instance-id` canary lanes in dependency routing rules.
    pub canary_lanes: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let namespace =
            std::env::var("MESH_NAMESPACE").unwrap_or_else(|_| "cellery-system".to_string());

        let config_name =
            std::env::var("MESH_CONFIG_NAME").unwrap_or_else(|_| "mesh-config".to_string());

        let secret_name =
            std::env::var("MESH_SECRET_NAME").unwrap_or_else(|_| "mesh-secret".to_string());

        let log_level = std::env::var("MESH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_json = std::env::var("MESH_LOG_JSON")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let resync_secs: u64 = std::env::var("MESH_RESYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("MESH_RESYNC_INTERVAL_SECS must be a number of seconds")?;

        let canary_lanes = std::env::var("MESH_ROUTING_CANARY_LANES")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        Ok(Self {
            namespace,
            config_name,
            secret_name,
            log_level,
            log_json,
            resync_interval: Duration::from_secs(resync_secs),
            canary_lanes,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

// =============================================================================
// Mesh configuration
// =============================================================================

pub const DEFAULT_GATEWAY_IMAGE: &str = "cellery/cell-gateway:latest";
pub const DEFAULT_GATEWAY_OIDC_IMAGE: &str = "cellery/cell-gateway-oidc:latest";
pub const DEFAULT_STS_IMAGE: &str = "cellery/cell-sts:latest";
pub const DEFAULT_STS_OPA_IMAGE: &str = "openpolicyagent/opa:latest";

/// Policy applied when a token service declares none: allow everything.
pub const DEFAULT_STS_POLICY: &str = "package cellery.io\n\ndefault allow = true\n";

/// Images and token service defaults from the mesh ConfigMap.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    pub gateway_image: String,
    pub gateway_oidc_image: String,
    pub sts_image: String,
    pub sts_opa_image: String,
    /// Base token service configuration (a JSON object).
    pub sts_config: Map<String, Value>,
    pub sts_default_policy: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            gateway_image: DEFAULT_GATEWAY_IMAGE.to_string(),
            gateway_oidc_image: DEFAULT_GATEWAY_OIDC_IMAGE.to_string(),
            sts_image: DEFAULT_STS_IMAGE.to_string(),
            sts_opa_image: DEFAULT_STS_OPA_IMAGE.to_string(),
            sts_config: Map::new(),
            sts_default_policy: DEFAULT_STS_POLICY.to_string(),
        }
    }
}

impl MeshConfig {
    /// Read from ConfigMap data; absent keys keep their defaults.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str, default: String| data.get(key).cloned().unwrap_or(default);

        let sts_config = match data.get("sts-config") {
            Some(raw) => match serde_json::from_str::<Value>(raw).context("sts-config is not JSON")? {
                Value::Object(map) => map,
                _ => bail!("sts-config must be a JSON object"),
            },
            None => defaults.sts_config,
        };

        Ok(Self {
            gateway_image: get("cell-gateway-image", defaults.gateway_image),
            gateway_oidc_image: get("cell-gateway-oidc-image", defaults.gateway_oidc_image),
            sts_image: get("cell-sts-image", defaults.sts_image),
            sts_opa_image: get("cell-sts-opa-image", defaults.sts_opa_image),
            sts_config,
            sts_default_policy: get("sts-default-policy", defaults.sts_default_policy),
        })
    }
}

/// Signing bundle copied into every Cell and Composite secret.
///
/// Values stay base64-encoded, as stored.
#[derive(Clone, PartialEq, Eq)]
pub struct MeshSecret {
    pub key_pem: String,
    pub cert_pem: String,
    pub ca_chain_pem: String,
}

impl std::fmt::Debug for MeshSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSecret").finish_non_exhaustive()
    }
}

impl MeshSecret {
    pub const KEY_PEM: &'static str = "key.pem";
    pub const CERT_PEM: &'static str = "cert.pem";
    pub const CA_CHAIN_PEM: &'static str = "ca-chain.pem";

    /// Read from Secret data, checking every value is valid base64.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let get = |key: &str| -> Result<String> {
            let value = data
                .get(key)
                .with_context(|| format!("mesh secret is missing {key}"))?;
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .with_context(|| format!("mesh secret {key} is not base64"))?;
            Ok(value.clone())
        };

        Ok(Self {
            key_pem: get(Self::KEY_PEM)?,
            cert_pem: get(Self::CERT_PEM)?,
            ca_chain_pem: get(Self::CA_CHAIN_PEM)?,
        })
    }

    /// Secret data in stored (base64) form.
    pub fn data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (Self::KEY_PEM.to_string(), self.key_pem.clone()),
            (Self::CERT_PEM.to_string(), self.cert_pem.clone()),
            (Self::CA_CHAIN_PEM.to_string(), self.ca_chain_pem.clone()),
        ])
    }
}

/// Load the mesh ConfigMap and Secret. A missing ConfigMap means defaults;
/// a missing Secret means instances get no signing bundle.
pub async fn load_mesh(store: &dyn Store, config: &Config) -> Result<(MeshConfig, Option<MeshSecret>)> {
    let mesh = match store
        .get(ResourceKind::ConfigMap, &config.namespace, &config.config_name)
        .await?
    {
        Some(object) => MeshConfig::from_data(&string_map(&object, "data"))?,
        None => {
            warn!(
                namespace = %config.namespace,
                name = %config.config_name,
                "Mesh ConfigMap not found, using defaults"
            );
            MeshConfig::default()
        }
    };

    let secret = match store
        .get(ResourceKind::Secret, &config.namespace, &config.secret_name)
        .await?
    {
        Some(object) => Some(MeshSecret::from_data(&string_map(&object, "data"))?),
        None => {
            warn!(
                namespace = %config.namespace,
                name = %config.secret_name,
                "Mesh Secret not found, instances get no signing bundle"
            );
            None
        }
    };

    info!(gateway_image = %mesh.gateway_image, sts_image = %mesh.sts_image, "Mesh configuration loaded");
    Ok((mesh, secret))
}

fn string_map(object: &Object, field: &str) -> BTreeMap<String, String> {
    object
        .body
        .get(field)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_config_defaults_for_missing_keys() {
        let data = BTreeMap::from([
            ("cell-sts-image".to_string(), "registry/sts:2.0".to_string()),
            ("sts-config".to_string(), r#"{"issuer": "cellery.io"}"#.to_string()),
        ]);
        let mesh = MeshConfig::from_data(&data).unwrap();
        assert_eq!(mesh.sts_image, "registry/sts:2.0");
        assert_eq!(mesh.gateway_image, DEFAULT_GATEWAY_IMAGE);
        assert_eq!(mesh.sts_config["issuer"], "cellery.io");
        assert_eq!(mesh.sts_default_policy, DEFAULT_STS_POLICY);
    }

    #[test]
    fn test_mesh_config_rejects_non_object_sts_config() {
        let data = BTreeMap::from([("sts-config".to_string(), "[1, 2]".to_string())]);
        assert!(MeshConfig::from_data(&data).is_err());
    }

    #[test]
    fn test_mesh_secret_requires_base64() {
        let mut data = BTreeMap::from([
            ("key.pem".to_string(), "a2V5".to_string()),
            ("cert.pem".to_string(), "Y2VydA==".to_string()),
            ("ca-chain.pem".to_string(), "Y2E=".to_string()),
        ]);
        let secret = MeshSecret::from_data(&data).unwrap();
        assert_eq!(secret.data(), data);
        assert_eq!(format!("{secret:?}"), "MeshSecret { .. }");

        data.insert("cert.pem".to_string(), "not base64!".to_string());
        assert!(MeshSecret::from_data(&data).is_err());

        data.remove("key.pem");
        assert!(MeshSecret::from_data(&data).is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
    }
}
