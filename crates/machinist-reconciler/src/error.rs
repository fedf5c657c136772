use thiserror::Error;

use machinist_providers::ProviderError;
use machinist_store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
