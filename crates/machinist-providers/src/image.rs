use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use machinist_domain::{Image, ImageKind, ObservedStatus, VerifyMode};
use machinist_driver::{HostDriver, RunOptions};
use tracing::{debug, error, info, warn};

use crate::error::ProviderError;
use crate::provider::ResourceProvider;

const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Manages host-stored container images via `machinectl pull-tar`/`pull-raw` (§4.5).
pub struct ImageProvider {
    driver: Arc<dyn HostDriver>,
    machines_dir: PathBuf,
}

impl ImageProvider {
    pub fn new(driver: Arc<dyn HostDriver>, machines_dir: PathBuf) -> Self {
        ImageProvider { driver, machines_dir }
    }

    async fn has_transient_files(&self) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(&self.machines_dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.contains(".raw-") || name.contains(".tar-") {
                return true;
            }
        }
        false
    }

    async fn make_read_only(&self, name: &str) -> Result<(), ProviderError> {
        let show = self
            .driver
            .run(&["machinectl", "show-image", name], RunOptions::unchecked(Duration::from_secs(10)))
            .await?;
        if show.stdout.contains("ReadOnly=yes") {
            debug!(image = name, "already read-only");
            return Ok(());
        }
        self.driver
            .run(&["machinectl", "read-only", name, "true"], RunOptions::default())
            .await?;
        debug!(image = name, "made read-only");
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for ImageProvider {
    type Spec = Image;

    async fn validate(&self, _spec: &Image) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn status(&self, spec: &Image) -> Result<ObservedStatus, ProviderError> {
        let result = self
            .driver
            .run(
                &["machinectl", "show-image", spec.name.as_str()],
                RunOptions::unchecked(Duration::from_secs(10)),
            )
            .await;
        match result {
            Ok(output) if output.success() => Ok(ObservedStatus::Present),
            Ok(_) => Ok(ObservedStatus::Absent),
            Err(e) => {
                error!(image = spec.name.as_str(), error = %e, "error checking image status");
                Ok(ObservedStatus::Error)
            }
        }
    }

    async fn present(&self, spec: &Image) -> Result<(), ProviderError> {
        if self.status(spec).await? == ObservedStatus::Present {
            debug!(image = spec.name.as_str(), "already present");
            return Ok(());
        }

        info!(image = spec.name.as_str(), "pulling image");
        let pull_verb = match spec.kind {
            ImageKind::Tar => "pull-tar",
            ImageKind::Raw => "pull-raw",
        };
        let verify_flag = match spec.verify {
            VerifyMode::Signature => "--verify=signature",
            VerifyMode::Checksum => "--verify=checksum",
            VerifyMode::None => "--verify=no",
        };
        let name = spec.name.as_str().to_string();

        self.driver
            .run(
                &["machinectl", pull_verb, spec.source.as_str(), &name, verify_flag],
                RunOptions::with_timeout(PULL_TIMEOUT),
            )
            .await?;
        info!(image = spec.name.as_str(), "image pulled");

        if self.has_transient_files().await {
            if let Err(e) = self.driver.run(&["machinectl", "clean"], RunOptions::default()).await {
                warn!(error = %e, "error cleaning temporary image files");
            } else {
                debug!("cleaned temporary image files");
            }
        }

        self.make_read_only(&name).await?;
        Ok(())
    }

    async fn absent(&self, spec: &Image) -> Result<(), ProviderError> {
        if self.status(spec).await? == ObservedStatus::Absent {
            debug!(image = spec.name.as_str(), "already absent");
            return Ok(());
        }
        info!(image = spec.name.as_str(), "removing image");
        self.driver
            .run(&["machinectl", "remove", spec.name.as_str()], RunOptions::default())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{absent, ok, MockDriver};
    use machinist_domain::ImageName;

    fn image(name: &str) -> Image {
        Image {
            name: ImageName::new(name),
            kind: ImageKind::Tar,
            source: "https://example.test/u.tar".to_string(),
            verify: VerifyMode::Signature,
            custom_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn present_skips_pull_when_already_present() {
        let mock = Arc::new(MockDriver::new());
        mock.on("machinectl show-image u-tar", ok(""));
        let provider = ImageProvider::new(mock.clone(), PathBuf::from("/tmp/machines"));

        provider.present(&image("u-tar")).await.unwrap();

        assert!(!mock.calls.lock().unwrap().iter().any(|c| c.starts_with("machinectl pull")));
    }

    #[tokio::test]
    async fn present_pulls_and_marks_read_only_when_absent() {
        let mock = Arc::new(MockDriver::new());
        // `show-image` is probed twice (once by `status`, once by
        // `make_read_only`) and MockDriver scripts one fixed response per
        // command string, so both probes see the same "absent" result here.
        // That's still sufficient to exercise the path under test: absence
        // drives the pull, and an absent/empty show-image output never
        // contains "ReadOnly=yes" either, so the read-only call still fires.
        mock.on("machinectl show-image u-tar", absent());
        mock.on(
            "machinectl pull-tar https://example.test/u.tar u-tar --verify=signature",
            ok(""),
        );
        mock.on("machinectl read-only u-tar true", ok(""));
        let provider = ImageProvider::new(mock.clone(), PathBuf::from("/tmp/machines-nonexistent"));

        provider.present(&image("u-tar")).await.unwrap();

        let calls = mock.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.contains("pull-tar")));
        assert!(calls.iter().any(|c| c == "machinectl read-only u-tar true"));
    }

    #[tokio::test]
    async fn absent_is_noop_when_already_absent() {
        let mock = Arc::new(MockDriver::new());
        let provider = ImageProvider::new(mock.clone(), PathBuf::from("/tmp/machines"));

        provider.absent(&image("u-tar")).await.unwrap();

        assert!(!mock.calls.lock().unwrap().iter().any(|c| c.starts_with("machinectl remove")));
    }
}
