use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageName(pub String);

impl ImageName {
    pub fn new(s: impl Into<String>) -> Self {
        ImageName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfileName(pub String);

impl ProfileName {
    pub fn new(s: impl Into<String>) -> Self {
        ProfileName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerName(pub String);

impl ContainerName {
    pub fn new(s: impl Into<String>) -> Self {
        ContainerName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host machine names are restricted to a conservative character set:
    /// ASCII alphanumerics, `-` and `_`, non-empty, no leading dot.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Tar,
    Raw,
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageKind::Tar => write!(f, "tar"),
            ImageKind::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    Signature,
    Checksum,
    None,
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyMode::Signature => write!(f, "signature"),
            VerifyMode::Checksum => write!(f, "checksum"),
            VerifyMode::None => write!(f, "no"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomFileOp {
    Absent,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureState {
    Present,
    Absent,
}

impl Default for EnsureState {
    fn default() -> Self {
        EnsureState::Present
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Running
    }
}

/// Observed state of a resource as reported by a provider's `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStatus {
    Present,
    Absent,
    Unknown,
    Error,
}

// ── Core structs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFile {
    pub path: PathBuf,
    pub op: CustomFileOp,
    pub target: Option<PathBuf>,
}

impl CustomFile {
    pub fn validate(&self) -> Result<(), DomainError> {
        if matches!(self.op, CustomFileOp::Link) && self.target.is_none() {
            return Err(DomainError::CustomFileMissingTarget {
                path: self.path.display().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: ImageName,
    pub kind: ImageKind,
    pub source: String,
    pub verify: VerifyMode,
    #[serde(default)]
    pub custom_files: Vec<CustomFile>,
}

impl Image {
    pub fn validate(&self) -> Result<(), DomainError> {
        for cf in &self.custom_files {
            cf.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: ProfileName,
    pub machine_config_body: String,
    pub unit_override_body: String,
}

impl Profile {
    /// Both bodies must be non-empty for a profile to be usable (§3 invariant).
    pub fn is_usable(&self) -> bool {
        !self.machine_config_body.trim().is_empty() && !self.unit_override_body.trim().is_empty()
    }
}

/// Nocloud seed content, already resolved against any named template
/// (the `template` field is cleared once resolution has happened).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudInit {
    #[serde(default)]
    pub meta_data: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_data: String,
    #[serde(default)]
    pub network_config: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

impl CloudInit {
    /// Deep merge `override` on top of `self` (the template): mappings merge
    /// recursively, scalars/sequences at a key are replaced by the override,
    /// and a key absent from the override inherits the template's value.
    pub fn merged_with(&self, overrides: &CloudInit) -> CloudInit {
        CloudInit {
            meta_data: merge_maps(&self.meta_data, &overrides.meta_data),
            user_data: if overrides.user_data.is_empty() {
                self.user_data.clone()
            } else {
                overrides.user_data.clone()
            },
            network_config: overrides
                .network_config
                .clone()
                .or_else(|| self.network_config.clone()),
            template: None,
        }
    }
}

fn merge_maps(
    base: &BTreeMap<String, Value>,
    overrides: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut result = base.clone();
    for (key, value) in overrides {
        match (result.get(key), value) {
            (Some(Value::Object(base_obj)), Value::Object(override_obj)) => {
                let base_map: BTreeMap<String, Value> = base_obj
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let override_map: BTreeMap<String, Value> = override_obj
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let merged = merge_maps(&base_map, &override_map);
                result.insert(
                    key.clone(),
                    Value::Object(merged.into_iter().collect()),
                );
            }
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: ContainerName,
    pub image: ImageName,
    #[serde(default = "default_profile_name")]
    pub profile: ProfileName,
    #[serde(default)]
    pub ensure: EnsureState,
    #[serde(default)]
    pub state: RunState,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    #[serde(default)]
    pub cloud_init: Option<CloudInit>,
}

fn default_profile_name() -> ProfileName {
    ProfileName::new("isolated")
}

fn default_autostart() -> bool {
    true
}

/// Snapshot returned by the reconciliation engine's `get_container_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub exists: bool,
    pub running: bool,
    pub desired_state: RunState,
    pub ensure: EnsureState,
    pub image: ImageName,
    pub profile: ProfileName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_validity() {
        assert!(ContainerName::new("web-01").is_valid());
        assert!(ContainerName::new("db_1").is_valid());
        assert!(!ContainerName::new("").is_valid());
        assert!(!ContainerName::new(".hidden").is_valid());
        assert!(!ContainerName::new("has space").is_valid());
    }

    #[test]
    fn custom_file_link_requires_target() {
        let cf = CustomFile {
            path: PathBuf::from("/etc/hosts"),
            op: CustomFileOp::Link,
            target: None,
        };
        assert!(cf.validate().is_err());

        let cf_ok = CustomFile {
            target: Some(PathBuf::from("/etc/hosts.orig")),
            ..cf
        };
        assert!(cf_ok.validate().is_ok());
    }

    #[test]
    fn profile_usability() {
        let p = Profile {
            name: ProfileName::new("isolated"),
            machine_config_body: String::new(),
            unit_override_body: "x".into(),
        };
        assert!(!p.is_usable());

        let p2 = Profile {
            machine_config_body: "body".into(),
            ..p
        };
        assert!(p2.is_usable());
    }

    #[test]
    fn cloud_init_deep_merge_worked_example() {
        let template = CloudInit {
            meta_data: serde_json::from_value(serde_json::json!({
                "a": 1,
                "nested": {"x": 1},
            }))
            .unwrap(),
            user_data: "A".into(),
            network_config: None,
            template: None,
        };
        let overrides = CloudInit {
            meta_data: serde_json::from_value(serde_json::json!({
                "b": 2,
                "nested": {"y": 2},
            }))
            .unwrap(),
            user_data: String::new(),
            network_config: None,
            template: Some("base".into()),
        };

        let merged = template.merged_with(&overrides);

        let expected: BTreeMap<String, Value> = serde_json::from_value(serde_json::json!({
            "a": 1,
            "b": 2,
            "nested": {"x": 1, "y": 2},
        }))
        .unwrap();
        assert_eq!(merged.meta_data, expected);
        assert_eq!(merged.user_data, "A");
        assert!(merged.template.is_none());
    }

    #[test]
    fn cloud_init_merge_override_scalar_wins() {
        let template = CloudInit {
            meta_data: serde_json::from_value(serde_json::json!({"list": [1, 2, 3]})).unwrap(),
            ..Default::default()
        };
        let overrides = CloudInit {
            meta_data: serde_json::from_value(serde_json::json!({"list": [9]})).unwrap(),
            ..Default::default()
        };
        let merged = template.merged_with(&overrides);
        assert_eq!(merged.meta_data["list"], serde_json::json!([9]));
    }
}
