//! Tunnel lifecycle commands: start, stop, restart, status, build, logs, hook

use super::resolve_project;
use anyhow::Result;
use serveo_core::{
    ImageOutcome, LifecycleHooks, Project, ProjectSource, ReconcileOutcome, StdioSink,
    TunnelManager, ENV_CONTAINER, ENV_SUBDOMAIN,
};
use serveo_provider::{ContainerDetails, ContainerStatus};

/// Lifecycle event delivered by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    ProjectStart,
    ProjectStop,
}

/// Public URL of a tunnel, when the subdomain is known up front
fn public_url(project: &Project) -> Option<String> {
    project
        .subdomain()
        .map(|subdomain| format!("https://{}.serveo.net", subdomain))
}

fn report(project: &Project, outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Disabled => {
            println!(
                "Serveo is disabled for {}. Run 'serveo init' to enable it.",
                project.name
            );
        }
        ReconcileOutcome::AlreadyRunning(id) => {
            println!("Serveo is already running for {} ({})", project.name, id.short());
        }
        ReconcileOutcome::Started(id) => {
            println!("Serveo started for {} ({})", project.name, id.short());
            match public_url(project) {
                Some(url) => println!("  {}", url),
                None => println!("  Random subdomain, see 'serveo logs' for the address"),
            }
        }
    }
}

/// Start the tunnel, optionally replacing the container or rebuilding the image
pub async fn start(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    name: Option<&str>,
    restart: bool,
    build: bool,
) -> Result<ReconcileOutcome> {
    let project = resolve_project(projects, name)?;
    let outcome = manager.start(&project, restart, build).await?;
    report(&project, &outcome);
    Ok(outcome)
}

pub async fn stop(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    name: Option<&str>,
) -> Result<()> {
    let project = resolve_project(projects, name)?;
    if manager.stop(&project).await? {
        println!("Serveo stopped for {}", project.name);
    } else {
        println!("Serveo is not running for {}", project.name);
    }
    Ok(())
}

pub async fn restart(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    name: Option<&str>,
) -> Result<ReconcileOutcome> {
    let project = resolve_project(projects, name)?;
    let outcome = manager.restart(&project).await?;
    report(&project, &outcome);
    Ok(outcome)
}

/// Lines printed by `serveo status`. The URL and target come from the
/// container's environment, which may predate the project's current settings.
pub fn describe_status(project: &Project, details: Option<&ContainerDetails>) -> Vec<String> {
    let enabled = if project.tunnel_enabled() { "enabled" } else { "disabled" };
    let mut lines = vec![format!("{}: Serveo {}", project.name, enabled)];

    let Some(details) = details else {
        lines.push("  Container: none".to_string());
        return lines;
    };

    let symbol = if details.status == ContainerStatus::Running { "●" } else { "○" };
    lines.push(format!(
        "  Container: {} {} ({}, {})",
        symbol,
        details.name,
        details.id.short(),
        details.status
    ));
    match details.env_var(ENV_SUBDOMAIN) {
        Some(subdomain) => lines.push(format!("  URL:       https://{}.serveo.net", subdomain)),
        None => lines.push("  URL:       random subdomain, see 'serveo logs'".to_string()),
    }
    if let Some(target) = details.env_var(ENV_CONTAINER) {
        lines.push(format!("  Forwards:  {}:80", target));
    }
    lines
}

/// Show the project's settings and its tunnel container
pub async fn status(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    name: Option<&str>,
) -> Result<Option<ContainerDetails>> {
    let project = resolve_project(projects, name)?;
    let details = manager.status(&project).await?;
    for line in describe_status(&project, details.as_ref()) {
        println!("{}", line);
    }
    Ok(details)
}

/// Build the tunnel image without touching any container
pub async fn build(manager: &TunnelManager, rebuild: bool) -> Result<ImageOutcome> {
    let image = &manager.settings().image;
    if !rebuild {
        println!("Checking image {}...", image);
    }

    let outcome = manager.build(rebuild).await?;
    match &outcome {
        ImageOutcome::AlreadyPresent => {
            println!("Image {} is up to date. Use --rebuild to build it again.", image)
        }
        ImageOutcome::Built(_) => println!("Image {} built", image),
        ImageOutcome::Rebuilt(_) => println!("Image {} rebuilt", image),
    }
    Ok(outcome)
}

/// Follow the tunnel's output until the container goes away
pub async fn logs(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    name: Option<&str>,
) -> Result<()> {
    let project = resolve_project(projects, name)?;
    let mut sink = StdioSink;
    manager.logs(&project, &mut sink).await?;
    Ok(())
}

/// Deliver a host lifecycle event
pub async fn hook(
    manager: &TunnelManager,
    projects: &dyn ProjectSource,
    event: HookEvent,
    name: Option<&str>,
) -> Result<()> {
    let project = resolve_project(projects, name)?;
    tracing::debug!("Hook {:?} for {}", event, project.name);
    match event {
        HookEvent::ProjectStart => manager.on_project_start(&project).await?,
        HookEvent::ProjectStop => manager.on_project_stop(&project).await?,
    }
    Ok(())
}
