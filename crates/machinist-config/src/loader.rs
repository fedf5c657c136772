use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawAgentConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            http_proxy: None,
            https_proxy: None,
            no_proxy: "localhost,127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostPaths {
    pub machines_dir: PathBuf,
    pub nspawn_dir: PathBuf,
    pub system_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        HostPaths {
            machines_dir: PathBuf::from("/var/lib/machines"),
            nspawn_dir: PathBuf::from("/etc/systemd/nspawn"),
            system_dir: PathBuf::from("/etc/systemd/system"),
        }
    }
}

/// Validated top-level agent settings (§1.1 `AgentConfig`).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub socket_path: PathBuf,
    pub tcp_bind: Option<String>,
    pub reconciliation_interval_secs: u64,
    pub log_level: String,
    pub desired_state_dir: PathBuf,
    pub state_dir: PathBuf,
    pub proxy: ProxyConfig,
    pub host_paths: HostPaths,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            socket_path: PathBuf::from("./state/machinist-agent.sock"),
            tcp_bind: None,
            reconciliation_interval_secs: 30,
            log_level: "INFO".to_string(),
            desired_state_dir: PathBuf::from("./configs"),
            state_dir: PathBuf::from("./state"),
            proxy: ProxyConfig::default(),
            host_paths: HostPaths::default(),
        }
    }
}

const MIN_RECONCILIATION_INTERVAL_SECS: u64 = 5;
const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Load the top-level `config.yaml` at `path`. Missing optional fields fall
/// back to [`AgentConfig::default`] values.
pub fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawAgentConfig = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("loaded agent config from {}", path.display());
    convert(raw, path)
}

fn convert(raw: RawAgentConfig, path: &Path) -> Result<AgentConfig, ConfigError> {
    let defaults = AgentConfig::default();

    let reconciliation_interval_secs = raw
        .reconciliation_interval_secs
        .unwrap_or(defaults.reconciliation_interval_secs);
    if reconciliation_interval_secs < MIN_RECONCILIATION_INTERVAL_SECS {
        return Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: format!(
                "reconciliation_interval_secs must be >= {MIN_RECONCILIATION_INTERVAL_SECS}, got {reconciliation_interval_secs}"
            ),
        });
    }

    let log_level = raw
        .log_level
        .map(|s| s.to_uppercase())
        .unwrap_or(defaults.log_level);
    if !VALID_LOG_LEVELS.contains(&log_level.as_str()) {
        return Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: format!("invalid log level '{log_level}'"),
        });
    }

    let proxy = raw
        .proxy
        .map(|p| ProxyConfig {
            http_proxy: p.http_proxy,
            https_proxy: p.https_proxy,
            no_proxy: p.no_proxy.unwrap_or_else(|| defaults.proxy.no_proxy.clone()),
        })
        .unwrap_or(defaults.proxy);

    let host_paths = raw
        .host_paths
        .map(|h| HostPaths {
            machines_dir: h
                .machines_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.host_paths.machines_dir.clone()),
            nspawn_dir: h
                .nspawn_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.host_paths.nspawn_dir.clone()),
            system_dir: h
                .system_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.host_paths.system_dir.clone()),
        })
        .unwrap_or(defaults.host_paths);

    Ok(AgentConfig {
        socket_path: raw.socket_path.map(PathBuf::from).unwrap_or(defaults.socket_path),
        tcp_bind: raw.tcp_bind,
        reconciliation_interval_secs,
        log_level,
        desired_state_dir: raw
            .desired_state_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.desired_state_dir),
        state_dir: raw.state_dir.map(PathBuf::from).unwrap_or(defaults.state_dir),
        proxy,
        host_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_applied_for_minimal_config() {
        let f = write_temp("log_level: debug\n");
        let cfg = load_agent_config(f.path()).unwrap();
        assert_eq!(cfg.log_level, "DEBUG");
        assert_eq!(cfg.reconciliation_interval_secs, 30);
        assert_eq!(cfg.proxy.no_proxy, "localhost,127.0.0.1");
    }

    #[test]
    fn interval_below_floor_rejected() {
        let f = write_temp("reconciliation_interval_secs: 1\n");
        let err = load_agent_config(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }

    #[test]
    fn unknown_log_level_rejected() {
        let f = write_temp("log_level: VERBOSE\n");
        let err = load_agent_config(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }
}
