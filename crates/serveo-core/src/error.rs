//! Error types for serveo-core

use serveo_provider::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] serveo_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Image {0} is in use by a container; stop the tunnel first")]
    ImageInUse(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project name '{name}' is already used by {path}; pass --name to pick another")]
    ProjectNameTaken { name: String, path: PathBuf },

    #[error("Several projects are named '{0}'; run the command from the project's directory")]
    AmbiguousProject(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProviderError> for CoreError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::ConnectionError(msg) => CoreError::RuntimeUnavailable(msg),
            ProviderError::BuildError(msg) => CoreError::Build(msg),
            ProviderError::ImageInUse(image) => CoreError::ImageInUse(image),
            other => CoreError::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_are_classified() {
        assert!(matches!(
            CoreError::from(ProviderError::ConnectionError("no socket".into())),
            CoreError::RuntimeUnavailable(_)
        ));
        assert!(matches!(
            CoreError::from(ProviderError::BuildError("exit 1".into())),
            CoreError::Build(_)
        ));
        assert!(matches!(
            CoreError::from(ProviderError::ImageInUse("wocker-serveo".into())),
            CoreError::ImageInUse(_)
        ));
        assert!(matches!(
            CoreError::from(ProviderError::ContainerNotFound("x".into())),
            CoreError::Provider(ProviderError::ContainerNotFound(_))
        ));
    }
}
