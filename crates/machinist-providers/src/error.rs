use thiserror::Error;

use machinist_driver::DriverError;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unbound template placeholder: {0}")]
    UnboundPlaceholder(String),

    #[error("spec validation failed: {0}")]
    Invalid(String),
}
