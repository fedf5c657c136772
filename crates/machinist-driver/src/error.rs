use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("command failed: {cmd} (exit {exit}): {stderr}")]
    CommandFailed {
        cmd: String,
        exit: i32,
        stderr: String,
    },

    #[error("command timed out: {cmd}")]
    CommandTimeout { cmd: String },

    #[error("bus call failed: {0}")]
    BusError(String),
}
