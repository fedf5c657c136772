use std::sync::Arc;

use machinist_config::{HostPaths, ProxyConfig};
use machinist_driver::HostDriver;

use crate::cloudinit::CloudInitProvider;
use crate::container::ContainerProvider;
use crate::image::ImageProvider;
use crate::profile::ProfileProvider;

/// Owns one instance of each provider, wired to the host driver and paths
/// from configuration (§4.4).
///
/// Construction is two-phase: [`ProviderRegistry::build`] first builds the
/// providers that have no peer dependencies (image, profile, cloud-init),
/// then builds the container provider holding an `Arc` to the already-built
/// cloud-init provider. This mirrors the original's "construct, then call
/// `init(config, registry)` to resolve peers" step, adapted to Rust's
/// ownership model: peer resolution happens once, at construction, rather
/// than through a later mutable pass over already-built providers.
pub struct ProviderRegistry {
    pub image: ImageProvider,
    pub profile: ProfileProvider,
    pub cloudinit: Arc<CloudInitProvider>,
    pub container: ContainerProvider,
}

impl ProviderRegistry {
    pub fn build(driver: Arc<dyn HostDriver>, host_paths: &HostPaths, proxy: &ProxyConfig) -> Self {
        let image = ImageProvider::new(driver.clone(), host_paths.machines_dir.clone());
        let profile = ProfileProvider::new();
        let cloudinit = Arc::new(CloudInitProvider::new(host_paths.machines_dir.clone(), proxy.clone()));
        let container = ContainerProvider::new(
            driver,
            cloudinit.clone(),
            host_paths.machines_dir.clone(),
            host_paths.nspawn_dir.clone(),
            host_paths.system_dir.clone(),
            proxy.clone(),
        );

        ProviderRegistry {
            image,
            profile,
            cloudinit,
            container,
        }
    }
}
