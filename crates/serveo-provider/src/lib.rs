//! Container provider trait and implementations for serveo
//!
//! This crate provides an abstraction over container runtimes (Docker, and
//! Podman through its Docker-compatible API) limited to the operations the
//! tunnel needs: image checks and builds, container create/start/remove,
//! inspection, and log streaming.

mod docker;
mod error;
mod types;

pub use docker::DockerProvider;
pub use error::*;
pub use types::*;

use async_trait::async_trait;

/// Trait for container providers (Docker, Podman, etc.)
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Build an image from a Dockerfile
    async fn build(&self, config: &BuildConfig) -> Result<ImageId>;

    /// Check whether an image with this tag exists locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Remove an image. Fails with `ImageInUse` while a container references it.
    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Remove a container. Fails with `ContainerNotFound` if it does not exist.
    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Get detailed information about a container
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails>;

    /// Get container logs
    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream>;

    /// Check if the provider is available/connected
    async fn ping(&self) -> Result<()>;

    /// Get provider information
    fn info(&self) -> ProviderInfo;
}

/// Factory function to create a provider based on type
pub async fn create_provider(
    provider_type: ProviderType,
    config: &serveo_config::GlobalConfig,
) -> Result<Box<dyn ContainerProvider>> {
    match provider_type {
        ProviderType::Docker => {
            let socket = &config.providers.docker.socket;
            let provider = DockerProvider::new(socket).await?;
            Ok(Box::new(provider))
        }
        ProviderType::Podman => {
            let socket = &config.providers.podman.socket;
            let provider = DockerProvider::new_podman(socket).await?;
            Ok(Box::new(provider))
        }
    }
}

/// Test if a specific provider is available and responsive
pub async fn test_provider_connectivity(
    provider_type: ProviderType,
    config: &serveo_config::GlobalConfig,
) -> bool {
    match create_provider(provider_type, config).await {
        Ok(provider) => provider.ping().await.is_ok(),
        Err(_) => false,
    }
}

/// Detect which providers are available
pub async fn detect_available_providers(
    config: &serveo_config::GlobalConfig,
) -> Vec<(ProviderType, bool)> {
    let (docker, podman) = tokio::join!(
        test_provider_connectivity(ProviderType::Docker, config),
        test_provider_connectivity(ProviderType::Podman, config)
    );

    vec![(ProviderType::Docker, docker), (ProviderType::Podman, podman)]
}

/// Create the default provider based on global config.
/// If no provider is configured, tries Docker first, then Podman.
pub async fn create_default_provider(
    config: &serveo_config::GlobalConfig,
) -> Result<Box<dyn ContainerProvider>> {
    let provider_type = match config.defaults.provider.as_str() {
        "podman" => ProviderType::Podman,
        "docker" => ProviderType::Docker,
        "" => {
            tracing::debug!("No provider configured, auto-detecting...");
            let available = detect_available_providers(config).await;

            match available.iter().find(|(_, available)| *available) {
                Some((provider_type, _)) => {
                    tracing::debug!("Auto-detected provider: {}", provider_type);
                    *provider_type
                }
                None => {
                    // Neither answered; Docker gives the more useful error message
                    tracing::warn!("No providers detected, defaulting to Docker");
                    ProviderType::Docker
                }
            }
        }
        other => {
            tracing::warn!("Unknown provider '{}' in config, using Docker", other);
            ProviderType::Docker
        }
    };

    let socket_path = match provider_type {
        ProviderType::Podman => &config.providers.podman.socket,
        ProviderType::Docker => &config.providers.docker.socket,
    };

    match create_provider(provider_type, config).await {
        Ok(provider) => Ok(provider),
        Err(e) => {
            let socket_exists = std::path::Path::new(socket_path).exists();
            Err(ProviderError::ConnectionError(format_connection_error(
                provider_type,
                socket_path,
                socket_exists,
                &e,
            )))
        }
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(
    provider: ProviderType,
    socket_path: &str,
    socket_exists: bool,
    underlying: &ProviderError,
) -> String {
    let provider_name = match provider {
        ProviderType::Podman => "Podman",
        ProviderType::Docker => "Docker",
    };

    let mut msg = format!("Cannot connect to {}\n\n", provider_name);

    if !socket_exists {
        msg.push_str(&format!(
            "The {} API socket was not found at:\n  {}\n\n",
            provider_name, socket_path
        ));

        match provider {
            ProviderType::Podman => {
                msg.push_str("To enable the Podman socket, run:\n");
                msg.push_str("  systemctl --user enable --now podman.socket\n");
            }
            ProviderType::Docker => {
                msg.push_str("To start Docker, run:\n");
                msg.push_str("  sudo systemctl enable --now docker\n");
            }
        }
    } else {
        msg.push_str(&format!(
            "The socket exists at {} but the daemon is not responding.\n\n",
            socket_path
        ));
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}
