use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit == 0
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Non-zero exit raises [`DriverError::CommandFailed`].
    pub check: bool,
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            check: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        RunOptions {
            timeout,
            ..Default::default()
        }
    }

    pub fn unchecked(timeout: Duration) -> Self {
        RunOptions {
            check: false,
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub name: String,
    pub class: String,
}

/// Wraps the host init/machine tooling (§4.1). All methods are suspension
/// points; none of them hold a lock across the underlying I/O.
#[async_trait]
pub trait HostDriver: Send + Sync + 'static {
    async fn run(&self, cmd: &[&str], opts: RunOptions) -> Result<CommandOutput, DriverError>;

    async fn reload_daemon(&self) -> Result<(), DriverError>;
    async fn start_unit(&self, name: &str) -> Result<(), DriverError>;
    async fn stop_unit(&self, name: &str) -> Result<(), DriverError>;
    async fn enable_unit(&self, name: &str) -> Result<(), DriverError>;
    async fn disable_unit(&self, name: &str) -> Result<(), DriverError>;
    async fn unit_state(&self, name: &str) -> Result<String, DriverError>;
    async fn list_machines(&self) -> Result<Vec<MachineInfo>, DriverError>;
}
