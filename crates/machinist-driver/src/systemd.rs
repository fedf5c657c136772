use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use zbus::Connection;

use crate::driver::{CommandOutput, HostDriver, MachineInfo, RunOptions};
use crate::error::DriverError;

const BUS_DESTINATION: &str = "org.freedesktop.systemd1";
const BUS_PATH: &str = "/org/freedesktop/systemd1";
const BUS_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

/// Talks to the host's init system over DBus, falling back to `systemctl`
/// and `machinectl` subprocesses when the bus is unavailable or a single
/// call fails.
///
/// Per §4.1, a fallback CLI invocation that itself fails does not replace
/// the error the caller sees: the original bus error is what surfaces. The
/// CLI path exists to keep the host moving when the bus is flaky, not to
/// mask why the bus call failed.
pub struct SystemdHostDriver {
    bus: Option<Connection>,
}

impl SystemdHostDriver {
    pub async fn connect() -> Self {
        match Connection::system().await {
            Ok(conn) => SystemdHostDriver { bus: Some(conn) },
            Err(e) => {
                warn!(error = %e, "system bus unavailable, falling back to CLI-only mode");
                SystemdHostDriver { bus: None }
            }
        }
    }

    async fn call_unit_method(&self, method: &str, unit: &str) -> Result<(), DriverError> {
        let Some(bus) = &self.bus else {
            return Err(DriverError::BusError("no system bus connection".into()));
        };
        let result = bus
            .call_method(
                Some(BUS_DESTINATION),
                BUS_PATH,
                Some(BUS_MANAGER_INTERFACE),
                method,
                &(unit, "replace"),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(DriverError::BusError(e.to_string())),
        }
    }

    /// `EnableUnitFiles(as files, b runtime, b force)` — a distinct
    /// signature from the `(s unit, s mode)` shape `StartUnit`/`StopUnit`
    /// take, so it cannot share `call_unit_method`.
    async fn call_enable_unit_files(&self, unit: &str) -> Result<(), DriverError> {
        let Some(bus) = &self.bus else {
            return Err(DriverError::BusError("no system bus connection".into()));
        };
        let result = bus
            .call_method(
                Some(BUS_DESTINATION),
                BUS_PATH,
                Some(BUS_MANAGER_INTERFACE),
                "EnableUnitFiles",
                &(&[unit][..], false, false),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(DriverError::BusError(e.to_string())),
        }
    }

    /// `DisableUnitFiles(as files, b runtime)`.
    async fn call_disable_unit_files(&self, unit: &str) -> Result<(), DriverError> {
        let Some(bus) = &self.bus else {
            return Err(DriverError::BusError("no system bus connection".into()));
        };
        let result = bus
            .call_method(
                Some(BUS_DESTINATION),
                BUS_PATH,
                Some(BUS_MANAGER_INTERFACE),
                "DisableUnitFiles",
                &(&[unit][..], false),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(DriverError::BusError(e.to_string())),
        }
    }

    /// Shared CLI-fallback for a bus attempt already made. On double
    /// failure the bus error is returned, never the CLI error.
    async fn with_cli_fallback(&self, bus_result: Result<(), DriverError>, cli_verb: &str, unit: &str) -> Result<(), DriverError> {
        match bus_result {
            Ok(()) => Ok(()),
            Err(bus_err) => {
                debug!(error = %bus_err, "bus call failed, attempting CLI fallback");
                let cli_result = self
                    .run(&["systemctl", cli_verb, unit], RunOptions::default())
                    .await;
                match cli_result {
                    Ok(_) => Ok(()),
                    Err(cli_err) => {
                        warn!(cli_error = %cli_err, "CLI fallback also failed, surfacing original bus error");
                        Err(bus_err)
                    }
                }
            }
        }
    }

    /// Shared bus-then-CLI-fallback helper for `start`/`stop`.
    async fn unit_action(&self, bus_method: &str, cli_verb: &str, unit: &str) -> Result<(), DriverError> {
        let bus_result = self.call_unit_method(bus_method, unit).await;
        self.with_cli_fallback(bus_result, cli_verb, unit).await
    }
}

#[async_trait]
impl HostDriver for SystemdHostDriver {
    async fn run(&self, cmd: &[&str], opts: RunOptions) -> Result<CommandOutput, DriverError> {
        let Some((program, args)) = cmd.split_first() else {
            return Err(DriverError::CommandFailed {
                cmd: String::new(),
                exit: -1,
                stderr: "empty command".into(),
            });
        };
        let cmd_string = cmd.join(" ");

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| DriverError::CommandFailed {
            cmd: cmd_string.clone(),
            exit: -1,
            stderr: e.to_string(),
        })?;

        let output = tokio::time::timeout(opts.timeout, child.wait_with_output())
            .await
            .map_err(|_| DriverError::CommandTimeout { cmd: cmd_string.clone() })?
            .map_err(|e| DriverError::CommandFailed {
                cmd: cmd_string.clone(),
                exit: -1,
                stderr: e.to_string(),
            })?;

        let result = CommandOutput {
            exit: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if opts.check && !result.success() {
            return Err(DriverError::CommandFailed {
                cmd: cmd_string,
                exit: result.exit,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    async fn reload_daemon(&self) -> Result<(), DriverError> {
        if let Some(bus) = &self.bus {
            let result = bus
                .call_method(Some(BUS_DESTINATION), BUS_PATH, Some(BUS_MANAGER_INTERFACE), "Reload", &())
                .await;
            if result.is_ok() {
                return Ok(());
            }
            let bus_err = DriverError::BusError(result.unwrap_err().to_string());
            return match self.run(&["systemctl", "daemon-reload"], RunOptions::default()).await {
                Ok(_) => Ok(()),
                Err(cli_err) => {
                    warn!(cli_error = %cli_err, "CLI fallback also failed, surfacing original bus error");
                    Err(bus_err)
                }
            };
        }
        self.run(&["systemctl", "daemon-reload"], RunOptions::default())
            .await
            .map(|_| ())
    }

    async fn start_unit(&self, name: &str) -> Result<(), DriverError> {
        self.unit_action("StartUnit", "start", name).await
    }

    async fn stop_unit(&self, name: &str) -> Result<(), DriverError> {
        self.unit_action("StopUnit", "stop", name).await
    }

    async fn enable_unit(&self, name: &str) -> Result<(), DriverError> {
        let bus_result = self.call_enable_unit_files(name).await;
        self.with_cli_fallback(bus_result, "enable", name).await
    }

    async fn disable_unit(&self, name: &str) -> Result<(), DriverError> {
        let bus_result = self.call_disable_unit_files(name).await;
        self.with_cli_fallback(bus_result, "disable", name).await
    }

    async fn unit_state(&self, name: &str) -> Result<String, DriverError> {
        let output = self
            .run(
                &["systemctl", "is-active", name],
                RunOptions::unchecked(Duration::from_secs(10)),
            )
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn list_machines(&self) -> Result<Vec<MachineInfo>, DriverError> {
        let output = self
            .run(&["machinectl", "list", "--no-legend", "--no-pager"], RunOptions::default())
            .await?;
        let machines = output
            .stdout
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let name = fields.next()?.to_string();
                let class = fields.next()?.to_string();
                Some(MachineInfo { name, class })
            })
            .collect();
        Ok(machines)
    }
}
