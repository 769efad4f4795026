//! Configuration command

use anyhow::Result;
use serveo_config::GlobalConfig;

/// Render the effective configuration as TOML
pub fn render_config(config: &GlobalConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Show the global configuration, or only its path
pub fn config(path_only: bool) -> Result<()> {
    let config_path = GlobalConfig::config_path()?;

    if path_only {
        println!("{}", config_path.display());
        return Ok(());
    }

    let config = if config_path.exists() {
        println!("# Config file: {:?}\n", config_path);
        GlobalConfig::load_from(&config_path)?
    } else {
        println!("# Config file: {:?} (not created yet)\n", config_path);
        println!("# Default configuration:");
        GlobalConfig::default()
    };
    println!("{}", render_config(&config)?);
    println!("# SSH directory: {}", config.ssh_dir()?.display());

    Ok(())
}
