pub mod driver;
pub mod error;
pub mod systemd;

pub use driver::{CommandOutput, HostDriver, MachineInfo, RunOptions};
pub use error::DriverError;
pub use systemd::SystemdHostDriver;
