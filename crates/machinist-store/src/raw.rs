use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every `images/*.yaml` file is a mapping of image name to body.
pub type RawImageFile = IndexMap<String, RawImage>;
/// Every `profiles/*.yaml` file is a mapping of profile name to body.
pub type RawProfileFile = IndexMap<String, RawProfile>;
/// Every `cloud-init/*.yaml` file is a mapping of template name to body.
pub type RawCloudInitFile = IndexMap<String, RawCloudInitBody>;

#[derive(Debug, Deserialize, Serialize)]
pub struct RawImage {
    pub kind: String,
    pub source: String,
    #[serde(default = "default_verify")]
    pub verify: String,
    #[serde(default)]
    pub custom_files: Vec<RawCustomFile>,
}

fn default_verify() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawCustomFile {
    pub path: String,
    pub op: String,
    pub target: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawProfile {
    pub machine_config_body: String,
    pub unit_override_body: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawCloudInitBody {
    #[serde(default)]
    pub meta_data: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_data: String,
    pub network_config: Option<String>,
}

/// Every `nodes/*.yaml` file declares a `containers:` mapping.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawNodeFile {
    #[serde(default)]
    pub containers: IndexMap<String, RawContainer>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawContainer {
    pub image: String,
    pub profile: Option<String>,
    pub ensure: Option<String>,
    pub state: Option<String>,
    pub autostart: Option<bool>,
    pub cloud_init: Option<RawContainerCloudInit>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawContainerCloudInit {
    pub template: Option<String>,
    #[serde(default)]
    pub meta_data: BTreeMap<String, Value>,
    #[serde(default)]
    pub user_data: String,
    pub network_config: Option<String>,
}
