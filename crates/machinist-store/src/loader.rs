use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use machinist_domain::{
    CloudInit, Container, ContainerName, CustomFile, CustomFileOp, EnsureState, Image, ImageKind,
    ImageName, Profile, ProfileName, RunState, VerifyMode,
};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::raw::{
    RawCloudInitFile, RawContainer, RawCustomFile, RawImage, RawImageFile, RawNodeFile,
    RawProfile, RawProfileFile,
};

/// Load every `images/*.yaml` file under `dir`. Per-file failures are logged
/// and skipped; the remaining images still load (§4.3 partial-failure rule).
pub fn load_images(dir: &Path) -> IndexMap<ImageName, Image> {
    let mut out = IndexMap::new();
    for path in yaml_files(dir) {
        match read_yaml::<RawImageFile>(&path) {
            Ok(raw_file) => {
                for (name, raw) in raw_file {
                    match convert_image(&name, raw, &path) {
                        Ok(image) => {
                            out.insert(image.name.clone(), image);
                        }
                        Err(e) => warn!("skipping image '{name}' in {}: {e}", path.display()),
                    }
                }
                debug!("loaded images from {}", path.display());
            }
            Err(e) => warn!("error loading {}: {e}", path.display()),
        }
    }
    out
}

/// Load every `profiles/*.yaml` file under `dir`.
pub fn load_profiles(dir: &Path) -> IndexMap<ProfileName, Profile> {
    let mut out = IndexMap::new();
    for path in yaml_files(dir) {
        match read_yaml::<RawProfileFile>(&path) {
            Ok(raw_file) => {
                for (name, raw) in raw_file {
                    let profile = convert_profile(&name, raw);
                    out.insert(profile.name.clone(), profile);
                }
                debug!("loaded profiles from {}", path.display());
            }
            Err(e) => warn!("error loading {}: {e}", path.display()),
        }
    }
    out
}

/// Load every `cloud-init/*.yaml` file under `dir` as a namespace of named
/// templates. These are never returned to callers directly — they exist only
/// to be deep-merged into container-level cloud-init overrides.
pub fn load_cloud_init_templates(dir: &Path) -> IndexMap<String, CloudInit> {
    let mut out = IndexMap::new();
    for path in yaml_files(dir) {
        match read_yaml::<RawCloudInitFile>(&path) {
            Ok(raw_file) => {
                for (name, raw) in raw_file {
                    out.insert(
                        name,
                        CloudInit {
                            meta_data: raw.meta_data,
                            user_data: raw.user_data,
                            network_config: raw.network_config,
                            template: None,
                        },
                    );
                }
                debug!("loaded cloud-init templates from {}", path.display());
            }
            Err(e) => warn!("error loading {}: {e}", path.display()),
        }
    }
    out
}

/// Load every `nodes/*.yaml` file under `dir`, resolving each container's
/// `cloud_init.template` reference (if any) against `templates` via deep
/// merge before the container record is constructed (§3, §4.3).
pub fn load_containers(
    dir: &Path,
    templates: &IndexMap<String, CloudInit>,
) -> IndexMap<ContainerName, Container> {
    let mut out = IndexMap::new();
    for path in yaml_files(dir) {
        match read_yaml::<RawNodeFile>(&path) {
            Ok(raw_file) => {
                for (name, raw) in raw_file.containers {
                    match convert_container(&name, raw, templates) {
                        Ok(container) => {
                            out.insert(container.name.clone(), container);
                        }
                        Err(e) => warn!("skipping container '{name}' in {}: {e}", path.display()),
                    }
                }
                debug!("loaded containers from {}", path.display());
            }
            Err(e) => warn!("error loading {}: {e}", path.display()),
        }
    }
    out
}

fn yaml_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "yaml" || ext == "yml"))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| StoreError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

fn convert_image(name: &str, raw: RawImage, path: &Path) -> Result<Image, StoreError> {
    let kind = parse_image_kind(&raw.kind, path)?;
    let verify = parse_verify_mode(&raw.verify, path)?;
    let custom_files = raw
        .custom_files
        .into_iter()
        .map(|cf| convert_custom_file(cf, path))
        .collect::<Result<Vec<_>, _>>()?;

    let image = Image {
        name: ImageName::new(name),
        kind,
        source: raw.source,
        verify,
        custom_files,
    };
    image.validate()?;
    Ok(image)
}

fn convert_custom_file(raw: RawCustomFile, path: &Path) -> Result<CustomFile, StoreError> {
    let op = match raw.op.as_str() {
        "absent" => CustomFileOp::Absent,
        "link" => CustomFileOp::Link,
        other => {
            return Err(StoreError::Conversion {
                path: path.display().to_string(),
                message: format!("unknown custom_file op '{other}'"),
            })
        }
    };
    Ok(CustomFile {
        path: PathBuf::from(raw.path),
        op,
        target: raw.target.map(PathBuf::from),
    })
}

fn convert_profile(name: &str, raw: RawProfile) -> Profile {
    Profile {
        name: ProfileName::new(name),
        machine_config_body: raw.machine_config_body,
        unit_override_body: raw.unit_override_body,
    }
}

fn convert_container(
    name: &str,
    raw: RawContainer,
    templates: &IndexMap<String, CloudInit>,
) -> Result<Container, StoreError> {
    let ensure = match raw.ensure.as_deref() {
        None => EnsureState::Present,
        Some("present") => EnsureState::Present,
        Some("absent") => EnsureState::Absent,
        Some(other) => {
            return Err(StoreError::Conversion {
                path: name.to_string(),
                message: format!("unknown ensure value '{other}'"),
            })
        }
    };
    let state = match raw.state.as_deref() {
        None => RunState::Running,
        Some("running") => RunState::Running,
        Some("stopped") => RunState::Stopped,
        Some(other) => {
            return Err(StoreError::Conversion {
                path: name.to_string(),
                message: format!("unknown state value '{other}'"),
            })
        }
    };

    let cloud_init = raw.cloud_init.map(|ci| {
        let overrides = CloudInit {
            meta_data: ci.meta_data,
            user_data: ci.user_data,
            network_config: ci.network_config,
            template: ci.template.clone(),
        };
        match ci.template.as_deref().and_then(|t| templates.get(t)) {
            Some(template) => template.merged_with(&overrides),
            None => overrides,
        }
    });

    Ok(Container {
        name: ContainerName::new(name),
        image: ImageName::new(raw.image),
        profile: raw.profile.map(ProfileName::new).unwrap_or(ProfileName::new("isolated")),
        ensure,
        state,
        autostart: raw.autostart.unwrap_or(true),
        cloud_init,
    })
}

fn parse_image_kind(s: &str, path: &Path) -> Result<ImageKind, StoreError> {
    match s {
        "tar" => Ok(ImageKind::Tar),
        "raw" => Ok(ImageKind::Raw),
        other => Err(StoreError::Conversion {
            path: path.display().to_string(),
            message: format!("unknown image kind '{other}'"),
        }),
    }
}

fn parse_verify_mode(s: &str, path: &Path) -> Result<VerifyMode, StoreError> {
    match s {
        "signature" => Ok(VerifyMode::Signature),
        "checksum" => Ok(VerifyMode::Checksum),
        "none" | "no" => Ok(VerifyMode::None),
        other => Err(StoreError::Conversion {
            path: path.display().to_string(),
            message: format!("unknown verify mode '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_images_and_skips_bad_ones() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "a.yaml",
            "good:\n  kind: tar\n  source: https://example.test/x.tar\n  verify: signature\nbad:\n  kind: nonsense\n  source: x\n",
        );
        let images = load_images(tmp.path());
        assert_eq!(images.len(), 1);
        assert!(images.contains_key(&ImageName::new("good")));
    }

    #[test]
    fn container_template_merge_via_loader() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "t.yaml",
            "base:\n  meta_data:\n    a: 1\n  user_data: \"A\"\n",
        );
        let templates = load_cloud_init_templates(tmp.path());

        let nodes = tempfile::tempdir().unwrap();
        write_file(
            nodes.path(),
            "n.yaml",
            "containers:\n  c1:\n    image: img\n    cloud_init:\n      template: base\n      meta_data:\n        b: 2\n",
        );
        let containers = load_containers(nodes.path(), &templates);
        let c1 = containers.get(&ContainerName::new("c1")).unwrap();
        let ci = c1.cloud_init.as_ref().unwrap();
        assert_eq!(ci.meta_data["a"], serde_json::json!(1));
        assert_eq!(ci.meta_data["b"], serde_json::json!(2));
        assert_eq!(ci.user_data, "A");
    }
}
