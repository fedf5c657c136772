use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid image name: {0}")]
    InvalidImageName(String),

    #[error("invalid profile name: {0}")]
    InvalidProfileName(String),

    #[error("invalid container name: {0}")]
    InvalidContainerName(String),

    #[error("custom file op=link requires a target: {path}")]
    CustomFileMissingTarget { path: String },

    #[error("profile '{0}' has an empty machine-config or unit-override body")]
    ProfileBodyEmpty(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
