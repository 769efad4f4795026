//! CLI command implementations

mod init;
mod manage;
mod tunnel;

use anyhow::Result;
use serveo_core::{Project, ProjectSource};

pub use init::*;
pub use manage::*;
pub use tunnel::*;

/// The project named on the command line, or the one for the current directory
fn resolve_project(projects: &dyn ProjectSource, name: Option<&str>) -> Result<Project> {
    let project = projects.current(name)?;
    tracing::debug!("Using project {} ({})", project.name, project.id);
    Ok(project)
}
