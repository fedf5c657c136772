use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use machinist_config::ProxyConfig;
use machinist_domain::{Container, ObservedStatus};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::ResourceProvider;
use crate::template;

const DISABLE_NETWORK_CONFIG: &str = "network: {config: disabled}\n";

/// Materialises the NoCloud seed directory inside a container root (§4.7).
/// Steps mirror the ones embedded in the container provider's `present`.
pub struct CloudInitProvider {
    machines_dir: PathBuf,
    proxy: ProxyConfig,
}

impl CloudInitProvider {
    pub fn new(machines_dir: PathBuf, proxy: ProxyConfig) -> Self {
        CloudInitProvider { machines_dir, proxy }
    }

    fn seed_dir(&self, container_name: &str) -> PathBuf {
        self.machines_dir.join(container_name).join("var/lib/cloud/seed/nocloud")
    }

    fn proxy_bindings(&self) -> BTreeMap<&str, String> {
        let mut bindings = BTreeMap::new();
        bindings.insert("http_proxy", self.proxy.http_proxy.clone().unwrap_or_default());
        bindings.insert("https_proxy", self.proxy.https_proxy.clone().unwrap_or_default());
        bindings.insert("no_proxy", self.proxy.no_proxy.clone());
        bindings
    }

    /// Writes the nocloud seed for `container`. No-op if it declares no cloud-init.
    pub async fn prepare(&self, container: &Container) -> Result<(), ProviderError> {
        let Some(cloud_init) = &container.cloud_init else {
            debug!(container = container.name.as_str(), "no cloud-init config");
            return Ok(());
        };

        let container_root = self.machines_dir.join(container.name.as_str());
        let seed_dir = self.seed_dir(container.name.as_str());
        tokio::fs::create_dir_all(&seed_dir)
            .await
            .map_err(|e| io_err(&seed_dir, e))?;

        let mut meta_data: BTreeMap<String, Value> = cloud_init.meta_data.clone();
        meta_data.insert(
            "local-hostname".to_string(),
            Value::String(container.name.as_str().to_string()),
        );
        meta_data
            .entry("instance-id".to_string())
            .or_insert_with(|| Value::String(format!("iid-{}", container.name.as_str())));

        let meta_yaml = serde_yaml::to_string(&meta_data).map_err(|e| {
            ProviderError::Invalid(format!("failed to render meta-data for {}: {e}", container.name.as_str()))
        })?;
        let meta_path = seed_dir.join("meta-data");
        tokio::fs::write(&meta_path, meta_yaml)
            .await
            .map_err(|e| io_err(&meta_path, e))?;

        if !cloud_init.user_data.is_empty() {
            let rendered = template::render(&cloud_init.user_data, &self.proxy_bindings())?;
            let user_path = seed_dir.join("user-data");
            tokio::fs::write(&user_path, rendered)
                .await
                .map_err(|e| io_err(&user_path, e))?;
        }

        match &cloud_init.network_config {
            Some(network_config) => {
                let network_path = seed_dir.join("network-config");
                tokio::fs::write(&network_path, network_config)
                    .await
                    .map_err(|e| io_err(&network_path, e))?;
            }
            None => {
                let disable_path = container_root.join("etc/cloud/cloud.cfg.d/99-disable-network-config.cfg");
                if let Some(parent) = disable_path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
                }
                tokio::fs::write(&disable_path, DISABLE_NETWORK_CONFIG)
                    .await
                    .map_err(|e| io_err(&disable_path, e))?;
            }
        }

        debug!(container = container.name.as_str(), "wrote cloud-init seed");
        Ok(())
    }
}

fn io_err(path: &std::path::Path, source: std::io::Error) -> ProviderError {
    ProviderError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ResourceProvider for CloudInitProvider {
    type Spec = Container;

    async fn validate(&self, _spec: &Container) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn status(&self, spec: &Container) -> Result<ObservedStatus, ProviderError> {
        if spec.cloud_init.is_none() {
            return Ok(ObservedStatus::Absent);
        }
        Ok(if self.seed_dir(spec.name.as_str()).is_dir() {
            ObservedStatus::Present
        } else {
            ObservedStatus::Absent
        })
    }

    async fn present(&self, spec: &Container) -> Result<(), ProviderError> {
        self.prepare(spec).await
    }

    async fn absent(&self, spec: &Container) -> Result<(), ProviderError> {
        let cloud_dir = self.machines_dir.join(spec.name.as_str()).join("var/lib/cloud");
        if cloud_dir.is_dir() {
            tokio::fs::remove_dir_all(&cloud_dir).await.map_err(|e| io_err(&cloud_dir, e))?;
            debug!(container = spec.name.as_str(), "removed cloud-init directory");
        }
        Ok(())
    }
}
