//! Tunnel container reconciliation
//!
//! Each enabled project gets exactly one container named `serveo-<id>`.
//! Nothing is locked in-process: the runtime's name uniqueness keeps
//! duplicates out, and a container that is not running is always removed
//! and recreated rather than restarted, so overlapping invocations settle
//! on the next reconcile.

use crate::{Project, Result};
use serveo_config::GlobalConfig;
use serveo_provider::{
    ContainerDetails, ContainerId, ContainerProvider, ContainerStatus, CreateContainerConfig,
    MountConfig, ProviderError, RestartPolicy,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variable carrying the requested subdomain
pub const ENV_SUBDOMAIN: &str = "SUBDOMAIN";

/// Environment variable carrying the project's internal address
pub const ENV_CONTAINER: &str = "CONTAINER";

/// Name of the tunnel container of a project
pub fn tunnel_container_name(project: &Project) -> String {
    format!("serveo-{}", project.id)
}

/// Settings shared by every tunnel container
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub image: String,
    /// Host directory holding the SSH keypair
    pub ssh_dir: PathBuf,
    pub ssh_mount_target: String,
    pub workspace_domain: String,
}

impl TunnelSettings {
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Ok(Self {
            image: config.tunnel.image.clone(),
            ssh_dir: config.ssh_dir()?,
            ssh_mount_target: config.tunnel.ssh_mount_target.clone(),
            workspace_domain: config.tunnel.workspace_domain.clone(),
        })
    }
}

/// What `reconcile` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The project has no tunnel; any container was removed
    Disabled,
    /// A running container was found and left alone
    AlreadyRunning(ContainerId),
    /// A new container was created and started
    Started(ContainerId),
}

pub struct TunnelController<'a> {
    provider: &'a dyn ContainerProvider,
    settings: &'a TunnelSettings,
}

impl<'a> TunnelController<'a> {
    pub fn new(provider: &'a dyn ContainerProvider, settings: &'a TunnelSettings) -> Self {
        Self { provider, settings }
    }

    /// The project's tunnel container, if one exists
    pub async fn find(&self, project: &Project) -> Result<Option<ContainerDetails>> {
        let name = ContainerId::new(tunnel_container_name(project));
        match self.provider.inspect(&name).await {
            Ok(details) => Ok(Some(details)),
            Err(ProviderError::ContainerNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the project's tunnel container. Returns whether one existed.
    pub async fn stop(&self, project: &Project) -> Result<bool> {
        let name = tunnel_container_name(project);
        match self.provider.remove(&ContainerId::new(&name), true).await {
            Ok(()) => {
                tracing::info!("Removed tunnel container {}", name);
                Ok(true)
            }
            Err(ProviderError::ContainerNotFound(_)) => {
                tracing::debug!("No tunnel container {} to remove", name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bring the runtime in line with the project's metadata
    pub async fn reconcile(&self, project: &Project, force_restart: bool) -> Result<ReconcileOutcome> {
        if !project.tunnel_enabled() {
            tracing::debug!("Tunnel disabled for project {}", project.name);
            self.stop(project).await?;
            return Ok(ReconcileOutcome::Disabled);
        }

        if force_restart {
            self.stop(project).await?;
        }

        if let Some(existing) = self.find(project).await? {
            if existing.status == ContainerStatus::Running {
                tracing::info!("Tunnel for {} is already running", project.name);
                return Ok(ReconcileOutcome::AlreadyRunning(existing.id));
            }
            tracing::debug!(
                "Replacing stale tunnel container {} ({})",
                existing.name,
                existing.status
            );
            self.stop(project).await?;
        }

        if !self.settings.ssh_dir.exists() {
            std::fs::create_dir_all(&self.settings.ssh_dir)?;
            tracing::debug!("Created SSH directory {:?}", self.settings.ssh_dir);
        }

        let config = self.create_config(project);
        let id = self.provider.create(&config).await?;
        self.provider.start(&id).await?;

        tracing::info!(
            "Started tunnel {} for {} ({})",
            tunnel_container_name(project),
            project.name,
            project.subdomain().unwrap_or("random subdomain")
        );
        Ok(ReconcileOutcome::Started(id))
    }

    pub(crate) fn create_config(&self, project: &Project) -> CreateContainerConfig {
        let mut env = HashMap::new();
        if let Some(subdomain) = project.subdomain() {
            env.insert(ENV_SUBDOMAIN.to_string(), subdomain.to_string());
        }
        env.insert(
            ENV_CONTAINER.to_string(),
            project.internal_address(&self.settings.workspace_domain),
        );

        CreateContainerConfig {
            image: self.settings.image.clone(),
            name: Some(tunnel_container_name(project)),
            env,
            mounts: vec![MountConfig {
                source: self.settings.ssh_dir.to_string_lossy().to_string(),
                target: self.settings.ssh_mount_target.clone(),
                read_only: false,
            }],
            labels: HashMap::from([
                ("serveo.managed".to_string(), "true".to_string()),
                ("serveo.project".to_string(), project.id.clone()),
            ]),
            tty: true,
            restart_policy: RestartPolicy::Always,
            ..Default::default()
        }
    }
}
