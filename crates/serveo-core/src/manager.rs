//! Tunnel manager - coordinates image, container and log operations

use crate::{
    BuildContext, ImageBuilder, ImageOutcome, LogRelay, OutputSink, Project, ReconcileOutcome,
    Result, TunnelController, TunnelSettings,
};
use async_trait::async_trait;
use serveo_config::GlobalConfig;
use serveo_provider::{ContainerDetails, ContainerProvider};

/// Lifecycle events delivered by the host environment.
///
/// A start event for a project always precedes its matching stop event;
/// nothing else about ordering is assumed.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_project_start(&self, project: &Project) -> Result<()>;
    async fn on_project_stop(&self, project: &Project) -> Result<()>;
}

/// Main tunnel manager
pub struct TunnelManager {
    /// Container provider
    provider: Box<dyn ContainerProvider>,
    /// Global configuration
    global_config: GlobalConfig,
    settings: TunnelSettings,
    build_context: BuildContext,
}

impl TunnelManager {
    /// Create a manager from the global config
    pub fn new(provider: Box<dyn ContainerProvider>, global_config: GlobalConfig) -> Result<Self> {
        let settings = TunnelSettings::from_config(&global_config)?;
        let build_context = BuildContext::from_config(global_config.tunnel.build_context.as_deref());

        Ok(Self {
            provider,
            global_config,
            settings,
            build_context,
        })
    }

    /// Create with explicit settings, bypassing the user's data directory
    pub fn new_for_testing(
        provider: Box<dyn ContainerProvider>,
        global_config: GlobalConfig,
        settings: TunnelSettings,
    ) -> Self {
        let build_context = BuildContext::from_config(global_config.tunnel.build_context.as_deref());
        Self {
            provider,
            global_config,
            settings,
            build_context,
        }
    }

    pub fn settings(&self) -> &TunnelSettings {
        &self.settings
    }

    fn images(&self) -> ImageBuilder<'_> {
        ImageBuilder::new(
            self.provider.as_ref(),
            &self.settings.image,
            &self.build_context,
        )
    }

    fn controller(&self) -> TunnelController<'_> {
        TunnelController::new(self.provider.as_ref(), &self.settings)
    }

    /// Ensure the tunnel image exists, rebuilding it when `force`
    pub async fn build(&self, force: bool) -> Result<ImageOutcome> {
        self.images().ensure_image(force).await
    }

    /// Start the project's tunnel.
    ///
    /// `restart` replaces a running container; `build` also rebuilds the
    /// image. Either one removes the current container first so the image
    /// is free to be replaced.
    pub async fn start(&self, project: &Project, restart: bool, build: bool) -> Result<ReconcileOutcome> {
        if restart || build {
            self.controller().stop(project).await?;
        }

        if project.tunnel_enabled() || build {
            let outcome = self.images().ensure_image(build).await?;
            tracing::debug!("Image step: {:?}", outcome);
        }

        self.controller().reconcile(project, restart).await
    }

    /// Remove the project's tunnel container. Returns whether one existed.
    pub async fn stop(&self, project: &Project) -> Result<bool> {
        self.controller().stop(project).await
    }

    pub async fn restart(&self, project: &Project) -> Result<ReconcileOutcome> {
        self.stop(project).await?;
        self.start(project, false, false).await
    }

    /// Relay the tunnel's output into `sink` until the stream ends
    pub async fn logs(&self, project: &Project, sink: &mut dyn OutputSink) -> Result<()> {
        LogRelay::new(self.provider.as_ref(), self.global_config.tunnel.log_tail)
            .stream_logs(project, sink)
            .await
    }

    /// The project's tunnel container, if any
    pub async fn status(&self, project: &Project) -> Result<Option<ContainerDetails>> {
        self.controller().find(project).await
    }
}

#[async_trait]
impl LifecycleHooks for TunnelManager {
    async fn on_project_start(&self, project: &Project) -> Result<()> {
        if project.tunnel_enabled() {
            self.images().ensure_image(false).await?;
        }
        self.controller().reconcile(project, false).await?;
        Ok(())
    }

    async fn on_project_stop(&self, project: &Project) -> Result<()> {
        self.controller().stop(project).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockProvider};
    use crate::{BufferSink, CoreError, ENV_CONTAINER, ENV_SUBDOMAIN};
    use serveo_provider::{ContainerStatus, LogChunk, ProviderType};

    const IMAGE: &str = "wocker-serveo";

    fn test_manager(tmp: &tempfile::TempDir, mock: &MockProvider) -> TunnelManager {
        let config = GlobalConfig::default();
        let settings = TunnelSettings {
            image: IMAGE.to_string(),
            ssh_dir: tmp.path().join("plugins").join("serveo").join(".ssh"),
            ssh_mount_target: "/home/user/.ssh".to_string(),
            workspace_domain: "workspace".to_string(),
        };
        TunnelManager::new_for_testing(Box::new(mock.clone()), config, settings)
    }

    fn shop(enabled: bool) -> Project {
        let mut project = Project::new("42", "shop", "/work/shop");
        project.set_tunnel_enabled(enabled);
        project
    }

    fn builds(mock: &MockProvider) -> usize {
        mock.count_calls(|c| matches!(c, MockCall::Build { .. }))
    }

    #[tokio::test]
    async fn test_start_shop_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);

        let outcome = manager.start(&shop(true), false, false).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Started(_)));

        let container = mock.container("serveo-42").unwrap();
        assert_eq!(container.status, ContainerStatus::Running);
        assert!(!container.env.contains_key(ENV_SUBDOMAIN));
        assert_eq!(container.env[ENV_CONTAINER], "shop.workspace");
        assert!(manager.settings().ssh_dir.is_dir());
        assert_eq!(builds(&mock), 1);
    }

    #[tokio::test]
    async fn test_start_disabled_skips_image_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        mock.add_container("serveo-42", IMAGE, ContainerStatus::Running);
        let manager = test_manager(&tmp, &mock);

        let outcome = manager.start(&shop(false), false, false).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Disabled);
        assert_eq!(builds(&mock), 0);
        assert!(mock.container_names().is_empty());
    }

    #[tokio::test]
    async fn test_start_with_restart_gives_new_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);

        manager.start(&project, false, false).await.unwrap();
        let first = mock.container("serveo-42").unwrap();

        manager.start(&project, true, false).await.unwrap();
        let second = mock.container("serveo-42").unwrap();

        assert_ne!(first.id, second.id);
        assert!(second.started_at > first.started_at);
        assert_eq!(builds(&mock), 1);
    }

    #[tokio::test]
    async fn test_start_with_build_replaces_image_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);

        manager.start(&project, false, false).await.unwrap();
        manager.start(&project, false, true).await.unwrap();

        assert_eq!(builds(&mock), 2);
        assert!(mock.was_called(&MockCall::RemoveImage {
            image: IMAGE.to_string()
        }));
        assert_eq!(
            mock.container("serveo-42").unwrap().status,
            ContainerStatus::Running
        );
    }

    #[tokio::test]
    async fn test_build_while_tunnel_runs_is_image_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);

        manager.start(&shop(true), false, false).await.unwrap();
        let err = manager.build(true).await.unwrap_err();
        assert!(matches!(err, CoreError::ImageInUse(_)));
    }

    #[tokio::test]
    async fn test_restart_recreates_container() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);

        manager.start(&project, false, false).await.unwrap();
        let first = mock.container("serveo-42").unwrap().id;

        let outcome = manager.restart(&project).await.unwrap();
        let ReconcileOutcome::Started(id) = outcome else {
            panic!("expected a new container, got {:?}", outcome);
        };
        assert_ne!(id.0, first);
    }

    #[tokio::test]
    async fn test_hooks_match_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);

        manager.on_project_start(&project).await.unwrap();
        assert_eq!(
            mock.container("serveo-42").unwrap().status,
            ContainerStatus::Running
        );

        // A second start event is a no-op
        mock.clear_calls();
        manager.on_project_start(&project).await.unwrap();
        assert_eq!(
            mock.count_calls(|c| matches!(c, MockCall::Create { .. } | MockCall::Remove { .. })),
            0
        );

        manager.on_project_stop(&project).await.unwrap();
        assert!(mock.container("serveo-42").is_none());

        // Stopping twice is fine
        manager.on_project_stop(&project).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_hook_for_disabled_project_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);

        manager.on_project_start(&shop(false)).await.unwrap();
        assert_eq!(builds(&mock), 0);
        assert!(mock.container_names().is_empty());
    }

    #[tokio::test]
    async fn test_logs_use_configured_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);
        manager.start(&project, false, false).await.unwrap();
        mock.push_log(Ok(LogChunk::Stdout(b"hello\n".to_vec())));

        let mut sink = BufferSink::default();
        manager.logs(&project, &mut sink).await.unwrap();

        assert_eq!(sink.out_str(), "hello\n");
        let tail = GlobalConfig::default().tunnel.log_tail;
        assert_eq!(
            mock.count_calls(|c| matches!(c, MockCall::Logs { tail: t, .. } if *t == Some(tail))),
            1
        );
    }

    #[tokio::test]
    async fn test_status_reports_container() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = MockProvider::new(ProviderType::Docker);
        let manager = test_manager(&tmp, &mock);
        let project = shop(true);

        assert!(manager.status(&project).await.unwrap().is_none());
        manager.start(&project, false, false).await.unwrap();
        let details = manager.status(&project).await.unwrap().unwrap();
        assert_eq!(details.name, "serveo-42");
        assert_eq!(details.env_var(ENV_CONTAINER), Some("shop.workspace"));
    }
}
