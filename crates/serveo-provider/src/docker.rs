//! Docker provider implementation using bollard

use crate::{
    BuildConfig, ContainerDetails, ContainerId, ContainerProvider, ContainerStatus,
    CreateContainerConfig, ImageId, LogChunk, LogConfig, LogStream, MountInfo,
    ProviderError, ProviderInfo, ProviderType, RestartPolicy, Result,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::service::{HostConfig, Mount, MountTypeEnum, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::io::Write;
use std::path::Path;

impl From<BollardError> for ProviderError {
    fn from(e: BollardError) -> Self {
        match e {
            BollardError::IOError { .. } | BollardError::HyperResponseError { .. } => {
                ProviderError::ConnectionError(e.to_string())
            }
            other => ProviderError::RuntimeError(other.to_string()),
        }
    }
}

/// HTTP status carried by a daemon error response, if any
fn status_code(e: &BollardError) -> Option<u16> {
    match e {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Docker provider using bollard crate
pub struct DockerProvider {
    client: Docker,
    provider_type: ProviderType,
}

impl DockerProvider {
    /// Create a new Docker provider
    pub async fn new(socket_path: &str) -> Result<Self> {
        let client = if socket_path.starts_with("http://") || socket_path.starts_with("https://")
        {
            Docker::connect_with_http(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        } else {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
        };

        // Test connection
        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            provider_type: ProviderType::Docker,
        })
    }

    /// Create a new provider for Podman (uses Docker-compatible API)
    pub async fn new_podman(socket_path: &str) -> Result<Self> {
        let mut provider = Self::new(socket_path).await?;
        provider.provider_type = ProviderType::Podman;
        Ok(provider)
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn build(&self, config: &BuildConfig) -> Result<ImageId> {
        let tar_data = create_build_context(&config.context, &config.dockerfile)?;

        let options = BuildImageOptions {
            dockerfile: config.dockerfile.clone(),
            t: config.tag.clone(),
            nocache: config.no_cache,
            labels: config.labels.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(tar_data.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(ProviderError::BuildError(error));
                    }
                    if let Some(id) = output.aux.and_then(|aux| aux.id) {
                        image_id = Some(id);
                    }
                    if let Some(stream) = output.stream {
                        tracing::debug!("{}", stream.trim());
                    }
                }
                Err(BollardError::DockerResponseServerError { message, .. }) => {
                    return Err(ProviderError::BuildError(message))
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(id) = image_id {
            return Ok(ImageId::new(id));
        }

        // BuildKit does not always report the image ID, ask for it instead
        let inspect = self
            .client
            .inspect_image(&config.tag)
            .await
            .map_err(|e| ProviderError::BuildError(format!("No image produced: {}", e)))?;
        Ok(ImageId::new(inspect.id.unwrap_or_else(|| config.tag.clone())))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: false,
            noprune: false,
        };
        match self.client.remove_image(image, Some(options), None).await {
            Ok(deleted) => {
                tracing::debug!("Removed image {} ({} layers)", image, deleted.len());
                Ok(())
            }
            Err(e) if status_code(&e) == Some(409) => {
                Err(ProviderError::ImageInUse(image.to_string()))
            }
            Err(e) if status_code(&e) == Some(404) => {
                tracing::debug!("Image {} already gone", image);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let options = config.name.as_ref().map(|name| CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        });

        let mounts: Vec<Mount> = config
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let restart_policy = bollard::service::RestartPolicy {
            name: Some(match config.restart_policy {
                RestartPolicy::No => RestartPolicyNameEnum::NO,
                RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
            }),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            mounts: if mounts.is_empty() {
                None
            } else {
                Some(mounts)
            },
            restart_policy: Some(restart_policy),
            ..Default::default()
        };

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let container_config = Config {
            image: Some(config.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            tty: Some(config.tty),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(options, container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("{}", warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.client.remove_container(&id.0, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                Err(ProviderError::ContainerNotFound(id.0.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        let info = match self.client.inspect_container(&id.0, None).await {
            Ok(info) => info,
            Err(e) if status_code(&e) == Some(404) => {
                return Err(ProviderError::ContainerNotFound(id.0.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let state = info.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map(|s| ContainerStatus::from(format!("{:?}", s).to_lowercase().as_str()))
            .unwrap_or(ContainerStatus::Unknown);

        let config = info.config.as_ref();

        let mounts = info
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                mount_type: m
                    .typ
                    .map(|t| format!("{:?}", t).to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string()),
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
                read_only: m.rw.map(|rw| !rw).unwrap_or(false),
            })
            .collect();

        let started_at = state
            .and_then(|s| s.started_at.as_ref())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());

        Ok(ContainerDetails {
            id: ContainerId::new(info.id.clone().unwrap_or_else(|| id.0.clone())),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            status,
            created: info
                .created
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(0),
            started_at,
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            env: config.and_then(|c| c.env.clone()).unwrap_or_default(),
            mounts,
        })
    }

    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: config.follow,
            stdout: config.stdout,
            stderr: config.stderr,
            tail: config
                .tail
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string()),
            timestamps: config.timestamps,
            since: 0,
            until: 0,
        };

        let name = id.0.clone();
        let stream = self.client.logs(&id.0, Some(options)).map(move |item| match item {
            Ok(LogOutput::StdErr { message }) => Ok(LogChunk::Stderr(message.to_vec())),
            Ok(LogOutput::StdOut { message })
            | Ok(LogOutput::Console { message })
            | Ok(LogOutput::StdIn { message }) => Ok(LogChunk::Stdout(message.to_vec())),
            Err(e) if status_code(&e) == Some(404) => {
                Err(ProviderError::ContainerNotFound(name.clone()))
            }
            Err(e) => Err(ProviderError::from(e)),
        });

        Ok(LogStream {
            stream: Box::pin(stream),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            version: "unknown".to_string(),
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Create a tar archive from the build context
fn create_build_context(context: &Path, dockerfile: &str) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::Builder;

    if !context.join(dockerfile).is_file() {
        return Err(ProviderError::BuildError(format!(
            "{} not found in build context {}",
            dockerfile,
            context.display()
        )));
    }

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);
        add_dir_to_tar(&mut builder, context, Path::new(""))?;
        builder.finish()?;
    }

    Ok(tar_data)
}

/// Recursively add directory contents to tar
fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    prefix: &Path,
) -> Result<()> {
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());

        let file_name = entry.file_name();
        let file_name_str = file_name.to_string_lossy();
        if file_name_str == ".git" || file_name_str == ".dockerignore" {
            continue;
        }

        if path.is_dir() {
            add_dir_to_tar(builder, &path, &name)?;
        } else if path.is_file() {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_names(tar_data: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_data));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_build_context_packs_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        std::fs::create_dir(tmp.path().join("bin")).unwrap();
        std::fs::write(tmp.path().join("bin").join("entrypoint.sh"), "#!/bin/sh\n").unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git").join("HEAD"), "ref").unwrap();

        let tar_data = create_build_context(tmp.path(), "Dockerfile").unwrap();
        assert_eq!(
            entry_names(&tar_data),
            vec!["Dockerfile".to_string(), "bin/entrypoint.sh".to_string()]
        );
    }

    #[test]
    fn test_build_context_missing_dockerfile() {
        let tmp = tempfile::tempdir().unwrap();
        let err = create_build_context(tmp.path(), "Dockerfile").unwrap_err();
        assert!(matches!(err, ProviderError::BuildError(_)));
    }

    #[test]
    fn test_server_errors_are_runtime_errors() {
        let err: ProviderError = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        }
        .into();
        assert!(matches!(err, ProviderError::RuntimeError(_)));
    }
}
