//! Global configuration for serveo
//!
//! Located at `~/.config/serveo/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image tag of the tunnel container
pub const DEFAULT_IMAGE: &str = "wocker-serveo";

/// Where the SSH credential directory is mounted inside the tunnel container
pub const DEFAULT_SSH_MOUNT_TARGET: &str = "/home/user/.ssh";

/// Global serveo configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub defaults: DefaultsConfig,
    pub providers: ProvidersConfig,
    pub tunnel: TunnelConfig,
}

/// Default settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Container provider ("docker" or "podman"), empty means auto-detect
    pub provider: String,
}

/// Provider-specific configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub docker: DockerConfig,
    pub podman: PodmanConfig,
}

/// Docker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path
    pub socket: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "//./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Podman-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodmanConfig {
    /// Podman socket path
    pub socket: String,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            socket: default_podman_socket(),
        }
    }
}

#[cfg(target_os = "linux")]
fn default_podman_socket() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| format!("{}/podman/podman.sock", dir))
        .unwrap_or_else(|_| "/run/user/1000/podman/podman.sock".to_string())
}

#[cfg(target_os = "macos")]
fn default_podman_socket() -> String {
    dirs::home_dir()
        .map(|h| {
            format!(
                "{}/.local/share/containers/podman/machine/podman-machine-default/podman.sock",
                h.display()
            )
        })
        .unwrap_or_else(|| "/var/run/podman.sock".to_string())
}

#[cfg(windows)]
fn default_podman_socket() -> String {
    "//./pipe/podman-machine-default".to_string()
}

/// Settings of the tunnel container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Image tag used for tunnel containers
    pub image: String,
    /// Host directory holding the tunnel's SSH keypair.
    /// Defaults to `<data_dir>/plugins/serveo/.ssh`.
    pub ssh_dir: Option<PathBuf>,
    /// Directory containing a Dockerfile to build the image from.
    /// When unset the recipe bundled with serveo is used.
    pub build_context: Option<PathBuf>,
    /// Mount point of `ssh_dir` inside the container
    pub ssh_mount_target: String,
    /// Number of log lines replayed before following
    pub log_tail: u64,
    /// Domain suffix of project containers on the internal network
    pub workspace_domain: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            ssh_dir: None,
            build_context: None,
            ssh_mount_target: DEFAULT_SSH_MOUNT_TARGET.to_string(),
            log_tail: 5,
            workspace_domain: "workspace".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        if config.tunnel.image.trim().is_empty() {
            return Err(ConfigError::Invalid("tunnel.image must not be empty".into()));
        }

        tracing::debug!(
            "Loaded config from {:?}: provider={:?} image={}",
            path,
            config.defaults.provider,
            config.tunnel.image
        );

        Ok(config)
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "serveo").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "serveo").ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Data directory owned by the tunnel plugin
    pub fn plugin_data_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("plugins").join("serveo"))
    }

    /// Host directory mounted into tunnel containers for the SSH keypair
    pub fn ssh_dir(&self) -> Result<PathBuf> {
        match &self.tunnel.ssh_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::plugin_data_dir()?.join(".ssh")),
        }
    }
}
