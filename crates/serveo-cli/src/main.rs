//! serveo - public HTTPS tunnels for local project containers

use clap::{Parser, Subcommand};
use serveo_cli::commands::{self, HookEvent};
use serveo_config::GlobalConfig;
use serveo_core::{ProjectFile, TunnelManager};
use serveo_provider::{create_default_provider, create_provider, ProviderType};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "serveo")]
#[command(author, version, about = "Serveo tunnel manager", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override default provider (docker or podman)
    #[arg(long, global = true, value_parser = ["docker", "podman"])]
    provider: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable or disable the tunnel for a project and pick its subdomain
    Init {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Start the project's tunnel
    Start {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
        /// Replace the tunnel container even if it is running
        #[arg(short, long)]
        restart: bool,
        /// Rebuild the tunnel image first
        #[arg(short, long)]
        build: bool,
    },

    /// Stop the project's tunnel
    Stop {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Stop and start the project's tunnel
    Restart {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show whether the project's tunnel is running and where it points
    Status {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Build the tunnel image
    Build {
        /// Remove and rebuild the image even if it exists
        #[arg(long)]
        rebuild: bool,
    },

    /// Follow the tunnel's output
    Logs {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Deliver a lifecycle event from the host environment
    Hook {
        #[command(subcommand)]
        event: HookCommand,
    },

    /// Show global configuration
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Subcommand)]
enum HookCommand {
    /// The project was started
    ProjectStart {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// The project was stopped
    ProjectStop {
        /// Project name (defaults to the project in the current directory)
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Commands that don't need a provider
    match &cli.command {
        Commands::Config { path } => return commands::config(*path),
        Commands::Init { name } => {
            let projects = ProjectFile::open_default()?;
            return commands::init(&projects, name.as_deref());
        }
        _ => {}
    }

    let config = GlobalConfig::load()?;

    let provider = match cli.provider.as_deref() {
        Some("docker") => create_provider(ProviderType::Docker, &config).await?,
        Some("podman") => create_provider(ProviderType::Podman, &config).await?,
        _ => create_default_provider(&config).await?,
    };
    tracing::debug!("Using provider {}", provider.info().provider_type);

    let manager = TunnelManager::new(provider, config)?;
    let projects = ProjectFile::open_default()?;

    match cli.command {
        Commands::Start {
            name,
            restart,
            build,
        } => {
            commands::start(&manager, &projects, name.as_deref(), restart, build).await?;
        }
        Commands::Stop { name } => {
            commands::stop(&manager, &projects, name.as_deref()).await?;
        }
        Commands::Restart { name } => {
            commands::restart(&manager, &projects, name.as_deref()).await?;
        }
        Commands::Status { name } => {
            commands::status(&manager, &projects, name.as_deref()).await?;
        }
        Commands::Build { rebuild } => {
            commands::build(&manager, rebuild).await?;
        }
        Commands::Logs { name } => {
            commands::logs(&manager, &projects, name.as_deref()).await?;
        }
        Commands::Hook { event } => {
            let (event, name) = match event {
                HookCommand::ProjectStart { name } => (HookEvent::ProjectStart, name),
                HookCommand::ProjectStop { name } => (HookEvent::ProjectStop, name),
            };
            commands::hook(&manager, &projects, event, name.as_deref()).await?;
        }
        Commands::Config { .. } | Commands::Init { .. } => {}
    }

    Ok(())
}
