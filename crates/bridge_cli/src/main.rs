//! Bridge CLI - operator commands for a bridge storage root.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Project locking and swap management for mirrored repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "bridge.toml", global = true)]
    config: PathBuf,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show disk usage and swap state, or one project's row
    Status {
        /// Project to show (all projects if omitted)
        project: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List every known project with its state
    Projects,
    /// Record the latest mirrored version of a project
    Register {
        /// Project name
        project: String,
        /// Snapshot version
        #[arg(long)]
        version: i64,
    },
    /// Move a project's repository to swap storage
    Evict {
        /// Project name
        project: String,
    },
    /// Bring a swapped project back to local disk
    Restore {
        /// Project name
        project: String,
    },
    /// Swap job control
    Swap {
        #[command(subcommand)]
        command: SwapCommands,
    },
}

#[derive(Subcommand)]
enum SwapCommands {
    /// Run one swap pass and print the report
    Run,
    /// Run the periodic swap job until stdin closes
    Serve,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warn, or info with --verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_path();
    match cli.command {
        Commands::Status { project, json } => {
            commands::status::run(config, project.as_deref(), json)
        }
        Commands::Projects => commands::projects::run(config),
        Commands::Register { project, version } => {
            commands::register::run(config, &project, version)
        }
        Commands::Evict { project } => commands::evict::run(config, &project),
        Commands::Restore { project } => commands::restore::run(config, &project),
        Commands::Swap { command } => match command {
            SwapCommands::Run => commands::swap::run_once(config),
            SwapCommands::Serve => commands::swap::serve(config),
        },
    }
}
