//! Collaborators that read cluster state
//!
//! The engine reads constraints, the shield config and verification keys
//! through these traits so that tests and embedders can supply fixed data.

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{debug, info};

use super::error::{KeyError, StoreError};
use crate::config::ShieldConfig;
use crate::crd::{ManifestIntegrityProfile, ManifestIntegrityProfileSpec};

/// Source of the active constraint set
#[async_trait]
pub trait ConstraintStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ManifestIntegrityProfileSpec>, StoreError>;
}

/// Source of the shield config. `None` means no config has been deployed.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Option<ShieldConfig>, StoreError>;
}

/// Materializes a verification key as a file the verifier can read
#[async_trait]
pub trait KeyLoader: Send + Sync {
    async fn load_key(&self, namespace: &str, name: &str) -> Result<PathBuf, KeyError>;
}

/// Lists cluster-scoped ManifestIntegrityProfile resources
#[derive(Clone)]
pub struct KubeConstraintStore {
    client: Client,
}

impl KubeConstraintStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConstraintStore for KubeConstraintStore {
    async fn list(&self) -> Result<Vec<ManifestIntegrityProfileSpec>, StoreError> {
        let profiles: Api<ManifestIntegrityProfile> = Api::all(self.client.clone());
        let list = profiles.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Loaded ManifestIntegrityProfiles");
        Ok(list.items.into_iter().map(|p| p.spec).collect())
    }
}

/// Reads the shield config from a ConfigMap key
#[derive(Clone)]
pub struct KubeConfigStore {
    client: Client,
    namespace: String,
    name: String,
    key: String,
}

impl KubeConfigStore {
    pub fn new(client: Client, namespace: &str, name: &str, key: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ConfigStore for KubeConfigStore {
    async fn load(&self) -> Result<Option<ShieldConfig>, StoreError> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        let Some(cm) = configmaps.get_opt(&self.name).await? else {
            debug!(
                namespace = %self.namespace,
                name = %self.name,
                "Shield config not found, using defaults"
            );
            return Ok(None);
        };

        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(&self.key))
            .ok_or_else(|| StoreError::MissingConfigKey {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
                key: self.key.clone(),
            })?;

        Ok(Some(ShieldConfig::from_yaml(raw)?))
    }
}

/// Writes the first data entry of a Secret under `{key_dir}/{namespace}/{name}/`
#[derive(Clone)]
pub struct SecretKeyLoader {
    client: Client,
    key_dir: PathBuf,
    default_namespace: String,
}

impl SecretKeyLoader {
    /// `default_namespace` is used when a constraint names a key secret without a namespace
    pub fn new(client: Client, key_dir: PathBuf, default_namespace: &str) -> Self {
        Self {
            client,
            key_dir,
            default_namespace: default_namespace.to_string(),
        }
    }
}

#[async_trait]
impl KeyLoader for SecretKeyLoader {
    async fn load_key(&self, namespace: &str, name: &str) -> Result<PathBuf, KeyError> {
        let namespace = if namespace.is_empty() {
            self.default_namespace.as_str()
        } else {
            namespace
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await.map_err(|source| KeyError::Secret {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;

        let (file_name, data) = secret
            .data
            .as_ref()
            .and_then(|data| data.iter().next())
            .ok_or_else(|| KeyError::Empty {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        write_key(&self.key_dir, namespace, name, file_name, &data.0).await
    }
}

async fn write_key(
    key_dir: &std::path::Path,
    namespace: &str,
    name: &str,
    file_name: &str,
    data: &[u8],
) -> Result<PathBuf, KeyError> {
    let dir = key_dir.join(namespace).join(name);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, data).await?;
    info!(path = %path.display(), "Saved verification key");
    Ok(path)
}

/// Fixed constraint set
#[derive(Clone, Debug, Default)]
pub struct StaticConstraintStore {
    constraints: Vec<ManifestIntegrityProfileSpec>,
}

impl StaticConstraintStore {
    pub fn new(constraints: Vec<ManifestIntegrityProfileSpec>) -> Self {
        Self { constraints }
    }
}

#[async_trait]
impl ConstraintStore for StaticConstraintStore {
    async fn list(&self) -> Result<Vec<ManifestIntegrityProfileSpec>, StoreError> {
        Ok(self.constraints.clone())
    }
}

/// Fixed shield config
#[derive(Clone, Debug, Default)]
pub struct StaticConfigStore {
    config: Option<ShieldConfig>,
}

impl StaticConfigStore {
    pub fn new(config: Option<ShieldConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn load(&self) -> Result<Option<ShieldConfig>, StoreError> {
        Ok(self.config.clone())
    }
}
