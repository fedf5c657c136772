#![cfg(test)]

use std::sync::Mutex;

use async_trait::async_trait;
use machinist_driver::{CommandOutput, DriverError, HostDriver, MachineInfo, RunOptions};

/// Records invocations and returns a scripted [`CommandOutput`] for `run`,
/// keyed by the joined command string. Everything else is a configurable
/// canned response, sufficient for provider unit tests that don't need a
/// real host.
pub struct MockDriver {
    pub responses: Mutex<std::collections::HashMap<String, CommandOutput>>,
    pub calls: Mutex<Vec<String>>,
    pub unit_states: Mutex<std::collections::HashMap<String, String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            responses: Mutex::new(std::collections::HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unit_states: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn on(&self, cmd: &str, output: CommandOutput) {
        self.responses.lock().unwrap().insert(cmd.to_string(), output);
    }

    pub fn set_unit_state(&self, unit: &str, state: &str) {
        self.unit_states.lock().unwrap().insert(unit.to_string(), state.to_string());
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed() -> CommandOutput {
    CommandOutput {
        exit: 1,
        stdout: String::new(),
        stderr: "not found".to_string(),
    }
}

/// A non-zero exit with no output, for scripting a resource's absence —
/// e.g. `machinectl show-image` on an image that hasn't been pulled yet.
pub fn absent() -> CommandOutput {
    failed()
}

#[async_trait]
impl HostDriver for MockDriver {
    async fn run(&self, cmd: &[&str], opts: RunOptions) -> Result<CommandOutput, DriverError> {
        let joined = cmd.join(" ");
        self.calls.lock().unwrap().push(joined.clone());
        let output = self
            .responses
            .lock()
            .unwrap()
            .get(&joined)
            .cloned()
            .unwrap_or_else(failed);
        if opts.check && !output.success() {
            return Err(DriverError::CommandFailed {
                cmd: joined,
                exit: output.exit,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn reload_daemon(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn start_unit(&self, name: &str) -> Result<(), DriverError> {
        self.unit_states.lock().unwrap().insert(name.to_string(), "active".to_string());
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> Result<(), DriverError> {
        self.unit_states.lock().unwrap().insert(name.to_string(), "inactive".to_string());
        Ok(())
    }

    async fn enable_unit(&self, _name: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn disable_unit(&self, _name: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn unit_state(&self, name: &str) -> Result<String, DriverError> {
        Ok(self
            .unit_states
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| "inactive".to_string()))
    }

    async fn list_machines(&self) -> Result<Vec<MachineInfo>, DriverError> {
        Ok(Vec::new())
    }
}
