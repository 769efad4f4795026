//! Project records
//!
//! A project is owned by the host environment; serveo only reads and writes
//! two metadata keys on it. When running standalone the records live in
//! `~/.local/share/serveo/projects.json`.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serveo_config::GlobalConfig;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Metadata key of the enablement flag
pub const ENABLE_KEY: &str = "SERVEO_ENABLE";

/// Metadata key of the requested subdomain
pub const SUBDOMAIN_KEY: &str = "SERVEO_SUBDOMAIN";

/// A metadata value. Older records stored flags as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Text(String),
}

/// A project known to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier, used to name the tunnel container
    pub id: String,
    /// Project name, also the hostname of its container on the internal network
    pub name: String,
    /// Workspace directory
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetaValue>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Address of the project's container on the internal network
    pub fn internal_address(&self, domain: &str) -> String {
        format!("{}.{}", self.name, domain)
    }

    /// Whether a tunnel should run for this project.
    ///
    /// Only `true` and `"true"` enable it; a missing key or any other value
    /// leaves it disabled.
    pub fn tunnel_enabled(&self) -> bool {
        match self.metadata.get(ENABLE_KEY) {
            Some(MetaValue::Bool(enabled)) => *enabled,
            Some(MetaValue::Text(s)) => s == "true",
            None => false,
        }
    }

    pub fn set_tunnel_enabled(&mut self, enabled: bool) {
        self.metadata
            .insert(ENABLE_KEY.to_string(), MetaValue::Bool(enabled));
    }

    /// Requested subdomain, `None` lets serveo.net pick one
    pub fn subdomain(&self) -> Option<&str> {
        match self.metadata.get(SUBDOMAIN_KEY) {
            Some(MetaValue::Text(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn set_subdomain(&mut self, subdomain: Option<&str>) {
        match subdomain.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                self.metadata
                    .insert(SUBDOMAIN_KEY.to_string(), MetaValue::Text(s.to_string()));
            }
            None => {
                self.metadata.remove(SUBDOMAIN_KEY);
            }
        }
    }

    /// Apply the answers of `serveo init`. Disabling keeps the stored
    /// subdomain so re-enabling offers it again.
    pub fn configure_tunnel(&mut self, enabled: bool, subdomain: Option<&str>) {
        self.set_tunnel_enabled(enabled);
        if enabled {
            self.set_subdomain(subdomain);
        }
    }
}

/// Where projects come from. Implemented by the host; `ProjectFile` is the
/// standalone implementation.
pub trait ProjectSource {
    /// The project named `name`, or the one the caller is working in
    fn current(&self, name: Option<&str>) -> Result<Project>;

    /// Persist a project's metadata
    fn save(&self, project: &Project) -> Result<()>;
}

/// Write content to a file atomically using a temp-file-then-rename pattern.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

struct PathLockGuard {
    lock_path: PathBuf,
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Take the sibling `*.lock` file of `path`, waiting up to ten seconds
fn acquire_lock(path: &Path) -> std::io::Result<PathLockGuard> {
    let lock_path = lock_path_for(path);
    for _ in 0..200 {
        match std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(_) => return Ok(PathLockGuard { lock_path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("timed out waiting for lock {}", lock_path.display()),
    ))
}

fn fnv1a64(input: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for b in input.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Project id derived from the workspace path
pub fn project_id_for(path: &Path) -> String {
    format!("{:016x}", fnv1a64(&path.to_string_lossy()))
        .chars()
        .take(12)
        .collect()
}

/// All registered projects
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectStore {
    /// Version for forward compatibility
    pub version: u32,
    /// Projects indexed by ID
    pub projects: HashMap<String, Project>,
}

impl ProjectStore {
    const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            projects: HashMap::new(),
        }
    }

    /// Load projects from a specific path. A missing file is an empty store.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)?;

        if store.version > Self::CURRENT_VERSION {
            tracing::warn!(
                "Project file version {} is newer than supported version {}",
                store.version,
                Self::CURRENT_VERSION
            );
        }

        Ok(store)
    }

    /// Save projects to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, content.as_bytes())?;

        Ok(())
    }

    /// Get the default project file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(GlobalConfig::data_dir()?.join("projects.json"))
    }

    pub fn add(&mut self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    /// The project called `name`. Several records with that name are an
    /// error; files written before names were unique can hold duplicates.
    pub fn find_by_name(&self, name: &str) -> Result<Option<&Project>> {
        let mut matches = self.projects.values().filter(|p| p.name == name);
        let found = matches.next();
        if matches.next().is_some() {
            return Err(CoreError::AmbiguousProject(name.to_string()));
        }
        Ok(found)
    }

    /// The project whose workspace contains `dir`, preferring the deepest one
    pub fn find_by_workspace(&self, dir: &Path) -> Option<&Project> {
        self.projects
            .values()
            .filter(|p| !p.path.as_os_str().is_empty() && dir.starts_with(&p.path))
            .max_by_key(|p| p.path.components().count())
    }
}

/// `dir` with symlinks resolved, so one workspace always maps to one id
fn resolve_dir(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// File-backed `ProjectSource` resolving the current project from a directory
pub struct ProjectFile {
    path: PathBuf,
    cwd: PathBuf,
}

impl ProjectFile {
    pub fn new(path: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cwd: cwd.into(),
        }
    }

    /// Project file at the default location, resolved against the process cwd
    pub fn open_default() -> Result<Self> {
        let cwd = resolve_dir(&std::env::current_dir()?);
        Ok(Self::new(ProjectStore::default_path()?, cwd))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProjectStore> {
        ProjectStore::load_from(&self.path)
    }

    /// Register the current directory as a project, or return the existing record.
    ///
    /// Names are unique: a name held by another workspace is refused.
    pub fn register(&self, name: Option<&str>) -> Result<Project> {
        let workspace = resolve_dir(&self.cwd);
        let name = match name {
            Some(name) => name.to_string(),
            None => workspace
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    CoreError::ProjectNotFound(format!(
                        "cannot derive a project name from {}",
                        workspace.display()
                    ))
                })?,
        };
        let id = project_id_for(&workspace);

        let project = self.update(|store| {
            if let Some(existing) = store.projects.get(&id) {
                return Ok(existing.clone());
            }
            if let Some(owner) = store.projects.values().find(|p| p.name == name) {
                return Err(CoreError::ProjectNameTaken {
                    name,
                    path: owner.path.clone(),
                });
            }
            let project = Project::new(id.clone(), name, workspace.clone());
            store.add(project.clone());
            Ok(project)
        })?;
        tracing::info!("Registered project {} ({})", project.name, project.id);
        Ok(project)
    }

    /// Re-read the file under its lock, apply `f`, and write it back if `f` succeeded
    fn update<T>(&self, f: impl FnOnce(&mut ProjectStore) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _lock = acquire_lock(&self.path)?;
        let mut store = ProjectStore::load_from(&self.path)?;
        let out = f(&mut store)?;
        store.save_to(&self.path)?;
        Ok(out)
    }
}

impl ProjectSource for ProjectFile {
    fn current(&self, name: Option<&str>) -> Result<Project> {
        let store = self.load()?;
        let found = match name {
            Some(name) => store.find_by_name(name)?,
            None => store.find_by_workspace(&resolve_dir(&self.cwd)),
        };
        found.cloned().ok_or_else(|| match name {
            Some(name) => CoreError::ProjectNotFound(name.to_string()),
            None => CoreError::ProjectNotFound(format!(
                "no project registered for {}",
                self.cwd.display()
            )),
        })
    }

    fn save(&self, project: &Project) -> Result<()> {
        self.update(|store| {
            store.add(project.clone());
            Ok(())
        })?;
        tracing::debug!("Saved project {} to {:?}", project.id, self.path);
        Ok(())
    }
}
