use serde::{Deserialize, Serialize};

/// Raw YAML representation of the top-level `config.yaml`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawAgentConfig {
    pub socket_path: Option<String>,
    pub tcp_bind: Option<String>,
    pub reconciliation_interval_secs: Option<u64>,
    pub log_level: Option<String>,
    pub desired_state_dir: Option<String>,
    pub state_dir: Option<String>,
    pub proxy: Option<RawProxyConfig>,
    pub host_paths: Option<RawHostPaths>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawHostPaths {
    pub machines_dir: Option<String>,
    pub nspawn_dir: Option<String>,
    pub system_dir: Option<String>,
}
