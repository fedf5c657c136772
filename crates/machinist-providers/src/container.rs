use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use machinist_config::ProxyConfig;
use machinist_domain::{Container, CustomFile, CustomFileOp, Image, ImageKind, ObservedStatus, Profile, RunState};
use machinist_driver::{HostDriver, RunOptions};
use tracing::{debug, info, warn};

use crate::cloudinit::CloudInitProvider;
use crate::error::ProviderError;
use crate::provider::ResourceProvider;
use crate::template;

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);
const REMOVE_TIMEOUT: Duration = Duration::from_secs(120);
const READY_POLL_ATTEMPTS: u32 = 30;

/// Result of executing a command inside a container (§4.6 `execute`).
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A container enriched with its resolved image and profile records, built
/// by the reconciliation engine before being handed to this provider — the
/// provider itself never looks up cross-references (§4.8).
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub container: Container,
    pub image: Image,
    pub profile: Profile,
}

impl ContainerSpec {
    fn name(&self) -> &str {
        self.container.name.as_str()
    }

    fn unit_name(&self) -> String {
        format!("systemd-nspawn@{}.service", self.name())
    }
}

/// Manages systemd-nspawn containers: cloning from images, materialising
/// profile-derived config, and driving lifecycle transitions (§4.6).
pub struct ContainerProvider {
    driver: Arc<dyn HostDriver>,
    cloudinit: Arc<CloudInitProvider>,
    machines_dir: PathBuf,
    nspawn_dir: PathBuf,
    system_dir: PathBuf,
    proxy: ProxyConfig,
}

impl ContainerProvider {
    pub fn new(
        driver: Arc<dyn HostDriver>,
        cloudinit: Arc<CloudInitProvider>,
        machines_dir: PathBuf,
        nspawn_dir: PathBuf,
        system_dir: PathBuf,
        proxy: ProxyConfig,
    ) -> Self {
        ContainerProvider {
            driver,
            cloudinit,
            machines_dir,
            nspawn_dir,
            system_dir,
            proxy,
        }
    }

    fn proxy_bindings<'a>(&self, container_name: &'a str) -> BTreeMap<&'a str, String> {
        let mut bindings: BTreeMap<&str, String> = BTreeMap::new();
        bindings.insert("container_name", container_name.to_string());
        bindings.insert("http_proxy", self.proxy.http_proxy.clone().unwrap_or_default());
        bindings.insert("https_proxy", self.proxy.https_proxy.clone().unwrap_or_default());
        bindings.insert("no_proxy", self.proxy.no_proxy.clone());
        bindings
    }

    pub async fn is_running(&self, spec: &ContainerSpec) -> Result<bool, ProviderError> {
        let state = self.driver.unit_state(&spec.unit_name()).await?;
        Ok(state == "active")
    }

    pub async fn start(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        if self.is_running(spec).await? {
            debug!(container = spec.name(), "already running");
            return Ok(());
        }
        info!(container = spec.name(), "starting container");
        self.driver.start_unit(&spec.unit_name()).await?;
        self.wait_for_ready(spec.name()).await;
        Ok(())
    }

    pub async fn stop(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        if !self.is_running(spec).await? {
            debug!(container = spec.name(), "already stopped");
            return Ok(());
        }
        info!(container = spec.name(), "stopping container");
        self.driver.stop_unit(&spec.unit_name()).await?;
        Ok(())
    }

    pub async fn execute(&self, spec: &ContainerSpec, argv: &[String]) -> Result<ExecOutput, ProviderError> {
        let joined = argv
            .iter()
            .map(|a| shell_escape::escape(Cow::from(a.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let output = self
            .driver
            .run(
                &["machinectl", "shell", spec.name(), "/bin/bash", "-c", &joined],
                RunOptions::unchecked(Duration::from_secs(60)),
            )
            .await?;
        Ok(ExecOutput {
            exit: output.exit,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn wait_for_ready(&self, name: &str) {
        for _ in 0..READY_POLL_ATTEMPTS {
            let probe = self
                .driver
                .run(
                    &["machinectl", "shell", name, "/bin/true"],
                    RunOptions::unchecked(Duration::from_secs(5)),
                )
                .await;
            if matches!(probe, Ok(output) if output.success()) {
                debug!(container = name, "container is ready");
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        warn!(container = name, "container did not become ready in time");
    }

    async fn ensure_configs(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        if !spec.profile.machine_config_body.is_empty() {
            self.create_nspawn_config(spec).await?;
        }
        if !spec.profile.unit_override_body.is_empty() {
            self.create_systemd_override(spec).await?;
        }
        if spec.container.autostart {
            if let Err(e) = self.driver.enable_unit(&spec.unit_name()).await {
                warn!(container = spec.name(), error = %e, "failed to enable service");
            }
        }
        if spec.container.state == RunState::Running {
            self.start(spec).await?;
        }
        Ok(())
    }

    async fn create_nspawn_config(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        tokio::fs::create_dir_all(&self.nspawn_dir)
            .await
            .map_err(|e| io_err(&self.nspawn_dir, e))?;
        let content = template::render(&spec.profile.machine_config_body, &self.proxy_bindings(spec.name()))?;
        let path = self.nspawn_dir.join(format!("{}.nspawn", spec.name()));
        tokio::fs::write(&path, content).await.map_err(|e| io_err(&path, e))?;
        debug!(path = %path.display(), "created nspawn config");
        self.driver.reload_daemon().await?;
        Ok(())
    }

    async fn create_systemd_override(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        let override_dir = self.system_dir.join(format!("systemd-nspawn@{}.service.d", spec.name()));
        tokio::fs::create_dir_all(&override_dir)
            .await
            .map_err(|e| io_err(&override_dir, e))?;
        let content = template::render(&spec.profile.unit_override_body, &self.proxy_bindings(spec.name()))?;
        let path = override_dir.join("override.conf");
        tokio::fs::write(&path, content).await.map_err(|e| io_err(&path, e))?;
        debug!(path = %path.display(), "created systemd override");
        self.driver.reload_daemon().await?;
        Ok(())
    }

    async fn apply_custom_files(&self, container_name: &str, custom_files: &[CustomFile]) -> Result<(), ProviderError> {
        let container_root = self.machines_dir.join(container_name);
        for cf in custom_files {
            let file_path = container_root.join(&cf.path);
            match cf.op {
                CustomFileOp::Absent => {
                    if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
                        if file_path.is_dir() {
                            tokio::fs::remove_dir(&file_path).await.map_err(|e| io_err(&file_path, e))?;
                        } else {
                            tokio::fs::remove_file(&file_path).await.map_err(|e| io_err(&file_path, e))?;
                        }
                        debug!(path = %file_path.display(), "removed custom file");
                    }
                }
                CustomFileOp::Link => {
                    let Some(target) = &cf.target else { continue };
                    if tokio::fs::symlink_metadata(&file_path).await.is_ok() {
                        tokio::fs::remove_file(&file_path).await.map_err(|e| io_err(&file_path, e))?;
                    }
                    if let Some(parent) = file_path.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
                    }
                    tokio::fs::symlink(target, &file_path).await.map_err(|e| io_err(&file_path, e))?;
                    debug!(path = %file_path.display(), target = %target.display(), "linked custom file");
                }
            }
        }
        Ok(())
    }

    async fn cleanup_config_files(&self, container_name: &str) -> Result<(), ProviderError> {
        let nspawn_file = self.nspawn_dir.join(format!("{container_name}.nspawn"));
        if tokio::fs::try_exists(&nspawn_file).await.unwrap_or(false) {
            tokio::fs::remove_file(&nspawn_file).await.map_err(|e| io_err(&nspawn_file, e))?;
        }
        let override_dir = self.system_dir.join(format!("systemd-nspawn@{container_name}.service.d"));
        if tokio::fs::try_exists(&override_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&override_dir).await.map_err(|e| io_err(&override_dir, e))?;
        }
        Ok(())
    }

    async fn cleanup_partial_container(&self, container_name: &str) -> Result<(), ProviderError> {
        let container_dir = self.machines_dir.join(container_name);
        if tokio::fs::try_exists(&container_dir).await.unwrap_or(false) {
            info!(container = container_name, "cleaning up container directory");
            tokio::fs::remove_dir_all(&container_dir).await.map_err(|e| io_err(&container_dir, e))?;
        }
        let container_raw = self.machines_dir.join(format!("{container_name}.raw"));
        if tokio::fs::try_exists(&container_raw).await.unwrap_or(false) {
            info!(container = container_name, "cleaning up container raw file");
            tokio::fs::remove_file(&container_raw).await.map_err(|e| io_err(&container_raw, e))?;
        }
        self.cleanup_config_files(container_name).await
    }
}

fn io_err(path: &std::path::Path, source: std::io::Error) -> ProviderError {
    ProviderError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ResourceProvider for ContainerProvider {
    type Spec = ContainerSpec;

    async fn validate(&self, spec: &ContainerSpec) -> Result<bool, ProviderError> {
        Ok(spec.profile.is_usable())
    }

    async fn status(&self, spec: &ContainerSpec) -> Result<ObservedStatus, ProviderError> {
        let result = self
            .driver
            .run(
                &["machinectl", "show", spec.name()],
                RunOptions::unchecked(Duration::from_secs(10)),
            )
            .await;
        let Ok(output) = result else {
            return Ok(ObservedStatus::Error);
        };
        if output.success() {
            return Ok(ObservedStatus::Present);
        }

        let container_dir = self.machines_dir.join(spec.name());
        let container_raw = self.machines_dir.join(format!("{}.raw", spec.name()));
        let dir_exists = tokio::fs::try_exists(&container_dir).await.unwrap_or(false);
        let raw_exists = tokio::fs::try_exists(&container_raw).await.unwrap_or(false);

        if raw_exists && spec.image.kind == ImageKind::Raw {
            return Ok(ObservedStatus::Present);
        }
        if dir_exists || raw_exists {
            warn!(container = spec.name(), "container has partial creation");
        }
        Ok(ObservedStatus::Absent)
    }

    async fn present(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        if self.status(spec).await? == ObservedStatus::Present {
            debug!(container = spec.name(), "already present");
            self.ensure_configs(spec).await?;
            return Ok(());
        }

        info!(container = spec.name(), "creating container");
        self.cleanup_partial_container(spec.name()).await?;

        self.driver
            .run(
                &["machinectl", "clone", spec.container.image.as_str(), spec.name()],
                RunOptions::with_timeout(CLONE_TIMEOUT),
            )
            .await?;
        debug!(container = spec.name(), image = spec.container.image.as_str(), "cloned image");

        if spec.image.kind == ImageKind::Tar {
            self.apply_custom_files(spec.name(), &spec.image.custom_files).await?;
            if spec.container.cloud_init.is_some() {
                self.cloudinit.prepare(&spec.container).await?;
            }
        } else {
            info!(container = spec.name(), "raw image: skipping custom files and cloud-init");
        }

        self.ensure_configs(spec).await
    }

    async fn absent(&self, spec: &ContainerSpec) -> Result<(), ProviderError> {
        if self.status(spec).await? == ObservedStatus::Present {
            info!(container = spec.name(), "removing container");
            self.stop(spec).await?;
            if let Err(e) = self.driver.disable_unit(&spec.unit_name()).await {
                warn!(container = spec.name(), error = %e, "failed to disable service");
            }
            self.driver
                .run(
                    &["machinectl", "remove", spec.name()],
                    RunOptions::with_timeout(REMOVE_TIMEOUT),
                )
                .await?;
        } else {
            debug!(container = spec.name(), "already absent, checking for residuals");
        }
        self.cleanup_partial_container(spec.name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ok, MockDriver};
    use machinist_domain::{ContainerName, EnsureState, ImageName, ProfileName, VerifyMode};
    use tempfile::tempdir;

    fn container_spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            container: Container {
                name: ContainerName::new(name),
                image: ImageName::new("u-tar"),
                profile: ProfileName::new("isolated"),
                ensure: EnsureState::Present,
                state: RunState::Running,
                autostart: true,
                cloud_init: None,
            },
            image: Image {
                name: ImageName::new("u-tar"),
                kind: ImageKind::Tar,
                source: "https://example.test/u.tar".to_string(),
                verify: VerifyMode::None,
                custom_files: Vec::new(),
            },
            profile: Profile {
                name: ProfileName::new("isolated"),
                machine_config_body: "[Exec]\nBoot=yes\n".to_string(),
                unit_override_body: "[Service]\nRestart=always\n".to_string(),
            },
        }
    }

    fn make_provider(mock: Arc<MockDriver>, machines_dir: PathBuf) -> ContainerProvider {
        let cloudinit = Arc::new(CloudInitProvider::new(machines_dir.clone(), ProxyConfig::default()));
        ContainerProvider::new(
            mock,
            cloudinit,
            machines_dir,
            PathBuf::from("/tmp/nonexistent-nspawn"),
            PathBuf::from("/tmp/nonexistent-system"),
            ProxyConfig::default(),
        )
    }

    #[tokio::test]
    async fn status_present_when_machinectl_knows_it() {
        let spec = container_spec("c1");
        let mock = Arc::new(MockDriver::new());
        mock.on("machinectl show c1", ok(""));
        let provider = make_provider(mock, PathBuf::from("/tmp/nonexistent-machines"));

        assert_eq!(provider.status(&spec).await.unwrap(), ObservedStatus::Present);
    }

    #[tokio::test]
    async fn status_absent_when_nothing_on_disk() {
        let spec = container_spec("c1");
        let mock = Arc::new(MockDriver::new());
        let tmp = tempdir().unwrap();
        let provider = make_provider(mock, tmp.path().to_path_buf());

        assert_eq!(provider.status(&spec).await.unwrap(), ObservedStatus::Absent);
    }

    #[tokio::test]
    async fn status_present_for_raw_image_with_raw_file_only() {
        let mut spec = container_spec("c1");
        spec.image.kind = ImageKind::Raw;
        let mock = Arc::new(MockDriver::new());
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("c1.raw"), b"raw-image-bytes").unwrap();
        let provider = make_provider(mock, tmp.path().to_path_buf());

        assert_eq!(provider.status(&spec).await.unwrap(), ObservedStatus::Present);
    }

    #[tokio::test]
    async fn is_running_reflects_unit_state() {
        let spec = container_spec("c1");
        let mock = Arc::new(MockDriver::new());
        mock.set_unit_state("systemd-nspawn@c1.service", "active");
        let provider = make_provider(mock, PathBuf::from("/tmp/nonexistent-machines"));

        assert!(provider.is_running(&spec).await.unwrap());
    }

    #[tokio::test]
    async fn stop_is_noop_when_not_running() {
        let spec = container_spec("c1");
        let mock = Arc::new(MockDriver::new());
        let provider = make_provider(mock.clone(), PathBuf::from("/tmp/nonexistent-machines"));

        provider.stop(&spec).await.unwrap();

        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execute_quotes_arguments_with_spaces() {
        let spec = container_spec("c1");
        let mock = Arc::new(MockDriver::new());
        mock.on(
            "machinectl shell c1 /bin/bash -c echo 'hello world'",
            ok("hello world\n"),
        );
        let provider = make_provider(mock, PathBuf::from("/tmp/nonexistent-machines"));

        let result = provider
            .execute(&spec, &["echo".to_string(), "hello world".to_string()])
            .await
            .unwrap();

        assert_eq!(result.stdout, "hello world\n");
        assert_eq!(result.exit, 0);
    }
}
