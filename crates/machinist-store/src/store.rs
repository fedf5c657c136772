use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use machinist_domain::{Container, ContainerName, Image, ImageName, Profile, ProfileName};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::loader::{load_cloud_init_templates, load_containers, load_images, load_profiles};

#[derive(Debug, Default, Clone)]
struct Catalog {
    images: IndexMap<ImageName, Image>,
    profiles: IndexMap<ProfileName, Profile>,
    containers: IndexMap<ContainerName, Container>,
}

/// Owns the validated desired-state catalog loaded from a directory tree of
/// `images/`, `profiles/`, `cloud-init/`, and `nodes/` subdirectories (§4.3, §6).
///
/// `load()` replaces the in-memory catalog atomically: readers observe either
/// the previous or the next coherent snapshot, never a torn one.
pub struct SpecStore {
    desired_state_dir: PathBuf,
    catalog: RwLock<Arc<Catalog>>,
}

impl SpecStore {
    pub fn new(desired_state_dir: impl Into<PathBuf>) -> Self {
        SpecStore {
            desired_state_dir: desired_state_dir.into(),
            catalog: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    /// Re-read the desired-state tree and replace the in-memory catalog.
    /// Per-resource-kind partial failures are logged (in the loaders) and
    /// skipped; the whole kind fails only if its directory cannot be read
    /// at all, which the per-file loaders already tolerate by returning an
    /// empty map.
    pub async fn load(&self) -> Result<(), StoreError> {
        let dir = self.desired_state_dir.clone();
        let catalog = tokio::task::spawn_blocking(move || {
            let images = load_images(&dir.join("images"));
            let profiles = load_profiles(&dir.join("profiles"));
            let templates = load_cloud_init_templates(&dir.join("cloud-init"));
            let containers = load_containers(&dir.join("nodes"), &templates);
            Catalog {
                images,
                profiles,
                containers,
            }
        })
        .await
        .map_err(|e| StoreError::Conversion {
            path: self.desired_state_dir.display().to_string(),
            message: format!("loader task panicked: {e}"),
        })?;

        let mut guard = self.catalog.write().await;
        *guard = Arc::new(catalog);
        Ok(())
    }

    /// A digest over every desired-state file's contents, used to decide if
    /// reconciliation must re-run out of cycle (§4.3).
    pub fn change_token(&self) -> Result<String, StoreError> {
        let mut files = Vec::new();
        for sub in ["images", "profiles", "cloud-init", "nodes"] {
            collect_yaml_files(&self.desired_state_dir.join(sub), &mut files);
        }
        let config_yaml = self.desired_state_dir.join("config.yaml");
        if config_yaml.is_file() {
            files.push(config_yaml);
        }
        files.sort();

        let mut hasher = Sha256::new();
        for path in files {
            let bytes = std::fs::read(&path).map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            hasher.update(path.display().to_string().as_bytes());
            hasher.update(&bytes);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub async fn get_image(&self, name: &ImageName) -> Option<Image> {
        self.catalog.read().await.images.get(name).cloned()
    }

    pub async fn get_profile(&self, name: &ProfileName) -> Option<Profile> {
        self.catalog.read().await.profiles.get(name).cloned()
    }

    pub async fn get_container(&self, name: &ContainerName) -> Option<Container> {
        self.catalog.read().await.containers.get(name).cloned()
    }

    pub async fn list_containers(&self) -> Vec<Container> {
        self.catalog.read().await.containers.values().cloned().collect()
    }

    pub async fn list_images(&self) -> Vec<Image> {
        self.catalog.read().await.images.values().cloned().collect()
    }

    pub async fn list_profiles(&self) -> Vec<Profile> {
        self.catalog.read().await.profiles.values().cloned().collect()
    }
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "yaml" || ext == "yml") {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn load_then_query() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            &tmp.path().join("images"),
            "i.yaml",
            "u-tar:\n  kind: tar\n  source: https://example.test/u.tar\n  verify: signature\n",
        );
        write_file(
            &tmp.path().join("nodes"),
            "n.yaml",
            "containers:\n  c1:\n    image: u-tar\n",
        );

        let store = SpecStore::new(tmp.path());
        store.load().await.unwrap();

        assert!(store.get_image(&ImageName::new("u-tar")).await.is_some());
        assert!(store.get_container(&ContainerName::new("c1")).await.is_some());
        assert!(store.get_image(&ImageName::new("missing")).await.is_none());
    }

    #[tokio::test]
    async fn change_token_reflects_edits() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join("images"), "i.yaml", "a:\n  kind: tar\n  source: x\n");
        let store = SpecStore::new(tmp.path());
        let before = store.change_token().unwrap();

        write_file(&tmp.path().join("images"), "i.yaml", "a:\n  kind: tar\n  source: y\n");
        let after = store.change_token().unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn reload_is_atomic_for_readers() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(&tmp.path().join("images"), "i.yaml", "a:\n  kind: tar\n  source: x\n");
        let store = Arc::new(SpecStore::new(tmp.path()));
        store.load().await.unwrap();
        assert!(store.get_image(&ImageName::new("a")).await.is_some());
    }
}
