//! Test support utilities for serveo-core
//!
//! Provides a `MockProvider` that simulates a container runtime in memory,
//! so tunnel lifecycle logic can be tested without Docker or Podman.

use async_trait::async_trait;
use serveo_provider::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Build { tag: String },
    ImageExists { image: String },
    RemoveImage { image: String },
    Create { image: String, name: Option<String> },
    Start { id: String },
    Remove { id: String, force: bool },
    Inspect { id: String },
    Logs { id: String, follow: bool, tail: Option<u64> },
    Ping,
}

/// A container held by the simulated runtime
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub env: HashMap<String, String>,
    pub mounts: Vec<MountConfig>,
    pub labels: HashMap<String, String>,
    pub tty: bool,
    pub restart_policy: RestartPolicy,
    /// Logical start time, increases with every start
    pub started_at: i64,
}

impl MockContainer {
    fn details(&self) -> ContainerDetails {
        ContainerDetails {
            id: ContainerId::new(&self.id),
            name: self.name.clone(),
            image: self.image.clone(),
            status: self.status,
            created: 0,
            started_at: (self.started_at > 0).then_some(self.started_at),
            labels: self.labels.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            mounts: self
                .mounts
                .iter()
                .map(|m| MountInfo {
                    mount_type: "bind".to_string(),
                    source: m.source.clone(),
                    destination: m.target.clone(),
                    read_only: m.read_only,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct MockRuntime {
    images: HashSet<String>,
    /// Containers by name
    containers: BTreeMap<String, MockContainer>,
    next_id: u64,
    clock: i64,
    logs: Vec<std::result::Result<LogChunk, String>>,
    build_error: Option<ProviderError>,
    unavailable: bool,
    /// Status of a container another client creates under the same name
    /// just before the next `create` lands
    rival_on_create: Option<ContainerStatus>,
}

impl MockRuntime {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("mock_container_{}", self.next_id)
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    /// Docker resolves both IDs and names
    fn lookup(&self, key: &str) -> Option<&MockContainer> {
        self.containers
            .get(key)
            .or_else(|| self.containers.values().find(|c| c.id == key))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ProviderError::ConnectionError(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory container runtime for testing. Clones share the same state.
#[derive(Clone)]
pub struct MockProvider {
    pub provider_type: ProviderType,
    calls: Arc<Mutex<Vec<MockCall>>>,
    runtime: Arc<Mutex<MockRuntime>>,
}

impl MockProvider {
    /// Create a mock runtime with no images and no containers
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            calls: Arc::new(Mutex::new(Vec::new())),
            runtime: Arc::new(Mutex::new(MockRuntime::default())),
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Count recorded calls matching a predicate
    pub fn count_calls(&self, f: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| f(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn add_image(&self, image: &str) {
        self.runtime.lock().unwrap().images.insert(image.to_string());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.runtime.lock().unwrap().images.contains(image)
    }

    /// Seed a container, returning its ID
    pub fn add_container(&self, name: &str, image: &str, status: ContainerStatus) -> String {
        let mut rt = self.runtime.lock().unwrap();
        let id = rt.next_id();
        let started_at = if status == ContainerStatus::Running {
            rt.tick()
        } else {
            0
        };
        rt.containers.insert(
            name.to_string(),
            MockContainer {
                id: id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                status,
                env: HashMap::new(),
                mounts: Vec::new(),
                labels: HashMap::new(),
                tty: false,
                restart_policy: RestartPolicy::No,
                started_at,
            },
        );
        id
    }

    /// Look up a container by name
    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.runtime.lock().unwrap().containers.get(name).cloned()
    }

    /// Names of all containers, sorted
    pub fn container_names(&self) -> Vec<String> {
        self.runtime.lock().unwrap().containers.keys().cloned().collect()
    }

    /// Queue an item for the next log stream; `Err` is a stream-level error
    pub fn push_log(&self, item: std::result::Result<LogChunk, String>) {
        self.runtime.lock().unwrap().logs.push(item);
    }

    /// Make every build fail with this error
    pub fn fail_builds(&self, error: ProviderError) {
        self.runtime.lock().unwrap().build_error = Some(error);
    }

    /// Simulate an unreachable daemon
    pub fn set_unavailable(&self, unavailable: bool) {
        self.runtime.lock().unwrap().unavailable = unavailable;
    }

    /// Let a concurrent client win the next `create` for the same name,
    /// leaving its container in `status`. The losing `create` sees the
    /// runtime's name conflict.
    pub fn race_next_create(&self, status: ContainerStatus) {
        self.runtime.lock().unwrap().rival_on_create = Some(status);
    }
}

/// Clone a ProviderError (thiserror types don't implement Clone)
fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::ContainerNotFound(s) => ProviderError::ContainerNotFound(s.clone()),
        ProviderError::ImageNotFound(s) => ProviderError::ImageNotFound(s.clone()),
        ProviderError::ImageInUse(s) => ProviderError::ImageInUse(s.clone()),
        ProviderError::BuildError(s) => ProviderError::BuildError(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
    }
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn build(&self, config: &BuildConfig) -> Result<ImageId> {
        self.record(MockCall::Build {
            tag: config.tag.clone(),
        });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        if let Some(err) = rt.build_error.as_ref() {
            return Err(clone_provider_error(err));
        }
        rt.images.insert(config.tag.clone());
        let n = rt.tick();
        Ok(ImageId::new(format!("sha256:mock_image_{}", n)))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(MockCall::ImageExists {
            image: image.to_string(),
        });
        let rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        Ok(rt.images.contains(image))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.record(MockCall::RemoveImage {
            image: image.to_string(),
        });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        if rt.containers.values().any(|c| c.image == image) {
            return Err(ProviderError::ImageInUse(image.to_string()));
        }
        rt.images.remove(image);
        Ok(())
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        self.record(MockCall::Create {
            image: config.image.clone(),
            name: config.name.clone(),
        });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        if !rt.images.contains(&config.image) {
            return Err(ProviderError::ImageNotFound(config.image.clone()));
        }
        let id = rt.next_id();
        let name = config.name.clone().unwrap_or_else(|| id.clone());
        if let Some(status) = rt.rival_on_create.take() {
            let rival_id = rt.next_id();
            let started_at = if status == ContainerStatus::Running {
                rt.tick()
            } else {
                0
            };
            rt.containers.insert(
                name.clone(),
                MockContainer {
                    id: rival_id,
                    name: name.clone(),
                    image: config.image.clone(),
                    status,
                    env: config.env.clone(),
                    mounts: config.mounts.clone(),
                    labels: config.labels.clone(),
                    tty: config.tty,
                    restart_policy: config.restart_policy,
                    started_at,
                },
            );
        }
        if rt.containers.contains_key(&name) {
            return Err(ProviderError::RuntimeError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                name
            )));
        }
        rt.containers.insert(
            name.clone(),
            MockContainer {
                id: id.clone(),
                name,
                image: config.image.clone(),
                status: ContainerStatus::Created,
                env: config.env.clone(),
                mounts: config.mounts.clone(),
                labels: config.labels.clone(),
                tty: config.tty,
                restart_policy: config.restart_policy,
                started_at: 0,
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        let name = rt
            .lookup(&id.0)
            .map(|c| c.name.clone())
            .ok_or_else(|| ProviderError::ContainerNotFound(id.0.clone()))?;
        let now = rt.tick();
        if let Some(container) = rt.containers.get_mut(&name) {
            container.status = ContainerStatus::Running;
            container.started_at = now;
        }
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(MockCall::Remove {
            id: id.0.clone(),
            force,
        });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        let container = rt
            .lookup(&id.0)
            .cloned()
            .ok_or_else(|| ProviderError::ContainerNotFound(id.0.clone()))?;
        if container.status == ContainerStatus::Running && !force {
            return Err(ProviderError::RuntimeError(format!(
                "cannot remove running container {}",
                container.name
            )));
        }
        rt.containers.remove(&container.name);
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerDetails> {
        self.record(MockCall::Inspect { id: id.0.clone() });
        let rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        rt.lookup(&id.0)
            .map(MockContainer::details)
            .ok_or_else(|| ProviderError::ContainerNotFound(id.0.clone()))
    }

    async fn logs(&self, id: &ContainerId, config: &LogConfig) -> Result<LogStream> {
        self.record(MockCall::Logs {
            id: id.0.clone(),
            follow: config.follow,
            tail: config.tail,
        });
        let mut rt = self.runtime.lock().unwrap();
        rt.check_available()?;
        if rt.lookup(&id.0).is_none() {
            return Err(ProviderError::ContainerNotFound(id.0.clone()));
        }
        let items: Vec<Result<LogChunk>> = std::mem::take(&mut rt.logs)
            .into_iter()
            .map(|item| item.map_err(ProviderError::RuntimeError))
            .collect();
        Ok(LogStream {
            stream: Box::pin(futures::stream::iter(items)),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.record(MockCall::Ping);
        self.runtime.lock().unwrap().check_available()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider_type: self.provider_type,
            version: "mock-1.0".to_string(),
            api_version: "mock".to_string(),
            os: "test".to_string(),
            arch: "test".to_string(),
        }
    }
}
