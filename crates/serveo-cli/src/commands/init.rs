//! Interactive tunnel setup for a project

use anyhow::{bail, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use serveo_core::{CoreError, Project, ProjectFile, ProjectSource, ENABLE_KEY};

/// Prompt defaults derived from a project's stored settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDefaults {
    pub enabled: bool,
    pub subdomain: String,
}

/// A never-configured project defaults to enabled, named after itself
pub fn init_defaults(project: &Project) -> InitDefaults {
    let enabled = if project.metadata.contains_key(ENABLE_KEY) {
        project.tunnel_enabled()
    } else {
        true
    };
    InitDefaults {
        enabled,
        subdomain: project.subdomain().unwrap_or(&project.name).to_string(),
    }
}

/// Subdomains are DNS labels: letters, digits and inner hyphens
pub fn validate_subdomain(input: &str) -> std::result::Result<(), String> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(());
    }
    if s.len() > 63 {
        return Err("Subdomain must be at most 63 characters".to_string());
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Use only letters, digits and '-'".to_string());
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err("Subdomain cannot start or end with '-'".to_string());
    }
    Ok(())
}

/// The project to configure. Without a name the current directory's
/// project is used. An unregistered directory is registered first, under
/// `name` when one is given.
pub fn project_for_init(projects: &ProjectFile, name: Option<&str>) -> Result<Project> {
    match projects.current(name) {
        Ok(project) => Ok(project),
        Err(CoreError::ProjectNotFound(missing)) => {
            if name.is_some() && projects.current(None).is_ok() {
                return Err(CoreError::ProjectNotFound(missing).into());
            }
            Ok(projects.register(name)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// The subdomain to store for an answer; a blank answer lets serveo.net pick one
pub fn subdomain_answer(answer: &str) -> Option<&str> {
    let answer = answer.trim();
    if answer.is_empty() {
        None
    } else {
        Some(answer)
    }
}

/// Store the answers on the project and persist it
pub fn apply_init(
    projects: &dyn ProjectSource,
    project: &mut Project,
    enabled: bool,
    subdomain: Option<&str>,
) -> Result<()> {
    if let Some(subdomain) = subdomain {
        if let Err(msg) = validate_subdomain(subdomain) {
            bail!("Invalid subdomain '{}': {}", subdomain, msg);
        }
    }
    project.configure_tunnel(enabled, subdomain);
    projects.save(project)?;
    Ok(())
}

/// Ask whether to enable the tunnel and which subdomain to request
pub fn init(projects: &ProjectFile, name: Option<&str>) -> Result<()> {
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        bail!("'serveo init' needs an interactive terminal");
    }

    let mut project = project_for_init(projects, name)?;
    let defaults = init_defaults(&project);
    let theme = ColorfulTheme::default();

    let enabled = Confirm::with_theme(&theme)
        .with_prompt("Enable Serveo?")
        .default(defaults.enabled)
        .interact()?;

    let answer = if enabled {
        Input::<String>::with_theme(&theme)
            .with_prompt("Subdomain (https://<subdomain>.serveo.net, clear for a random one)")
            .with_initial_text(defaults.subdomain)
            .allow_empty(true)
            .validate_with(|input: &String| validate_subdomain(input))
            .interact_text()?
    } else {
        String::new()
    };

    apply_init(projects, &mut project, enabled, subdomain_answer(&answer))?;

    match (enabled, project.subdomain()) {
        (false, _) => println!("Serveo disabled for {}", project.name),
        (true, Some(subdomain)) => println!(
            "Serveo enabled for {}: https://{}.serveo.net",
            project.name, subdomain
        ),
        (true, None) => println!(
            "Serveo enabled for {} with a random subdomain",
            project.name
        ),
    }
    println!("Run 'serveo start' to open the tunnel.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_file(tmp: &tempfile::TempDir) -> ProjectFile {
        let cwd = tmp.path().join("shop");
        std::fs::create_dir_all(&cwd).unwrap();
        ProjectFile::new(tmp.path().join("projects.json"), cwd)
    }

    #[test]
    fn test_defaults_for_new_project() {
        let project = Project::new("42", "shop", "/work/shop");
        assert_eq!(
            init_defaults(&project),
            InitDefaults {
                enabled: true,
                subdomain: "shop".to_string()
            }
        );
    }

    #[test]
    fn test_defaults_follow_stored_settings() {
        let mut project = Project::new("42", "shop", "/work/shop");
        project.configure_tunnel(true, Some("myshop"));
        project.set_tunnel_enabled(false);

        let defaults = init_defaults(&project);
        assert!(!defaults.enabled);
        assert_eq!(defaults.subdomain, "myshop");
    }

    #[test]
    fn test_validate_subdomain() {
        assert!(validate_subdomain("myshop").is_ok());
        assert!(validate_subdomain("my-shop-2").is_ok());
        assert!(validate_subdomain("").is_ok());
        assert!(validate_subdomain("my_shop").is_err());
        assert!(validate_subdomain("-shop").is_err());
        assert!(validate_subdomain("shop.example").is_err());
        assert!(validate_subdomain(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_project_for_init_registers_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = project_file(&tmp);

        let project = project_for_init(&projects, None).unwrap();
        assert_eq!(project.name, "shop");

        // Second call finds the same record
        let again = project_for_init(&projects, None).unwrap();
        assert_eq!(again.id, project.id);
    }

    #[test]
    fn test_project_for_init_unknown_name_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = project_file(&tmp);
        project_for_init(&projects, None).unwrap();

        assert!(project_for_init(&projects, Some("missing")).is_err());
    }

    #[test]
    fn test_project_for_init_name_clash_needs_new_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("projects.json");
        for dir in ["a/shop", "b/shop"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        let first = ProjectFile::new(&path, tmp.path().join("a/shop"));
        let second = ProjectFile::new(&path, tmp.path().join("b/shop"));
        let shop = project_for_init(&first, None).unwrap();

        let err = project_for_init(&second, None).unwrap_err();
        assert!(err.to_string().contains("already used"));

        let renamed = project_for_init(&second, Some("shop-b")).unwrap();
        assert_eq!(renamed.name, "shop-b");
        assert_ne!(renamed.id, shop.id);
        assert_eq!(second.current(Some("shop")).unwrap().id, shop.id);
    }

    #[test]
    fn test_blank_subdomain_answer_means_random() {
        assert_eq!(subdomain_answer("myshop"), Some("myshop"));
        assert_eq!(subdomain_answer(" myshop "), Some("myshop"));
        assert_eq!(subdomain_answer(""), None);
        assert_eq!(subdomain_answer("   "), None);
    }

    #[test]
    fn test_cleared_answer_drops_stored_subdomain() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = project_file(&tmp);
        let mut project = project_for_init(&projects, None).unwrap();
        apply_init(&projects, &mut project, true, Some("myshop")).unwrap();

        apply_init(&projects, &mut project, true, subdomain_answer("")).unwrap();

        let stored = projects.current(Some("shop")).unwrap();
        assert!(stored.tunnel_enabled());
        assert_eq!(stored.subdomain(), None);
    }

    #[test]
    fn test_apply_init_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = project_file(&tmp);
        let mut project = project_for_init(&projects, None).unwrap();

        apply_init(&projects, &mut project, true, Some("myshop")).unwrap();

        let stored = projects.current(Some("shop")).unwrap();
        assert!(stored.tunnel_enabled());
        assert_eq!(stored.subdomain(), Some("myshop"));
    }

    #[test]
    fn test_apply_init_rejects_bad_subdomain() {
        let tmp = tempfile::tempdir().unwrap();
        let projects = project_file(&tmp);
        let mut project = project_for_init(&projects, None).unwrap();

        assert!(apply_init(&projects, &mut project, true, Some("my shop")).is_err());
        let stored = projects.current(Some("shop")).unwrap();
        assert!(!stored.tunnel_enabled());
    }
}
