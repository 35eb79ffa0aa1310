//! Chorus CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive chat or single-message mode
//! - `actions`  — Discover actions and show their descriptors
//! - `init`     — Write a default config and descriptor file

use std::path::PathBuf;

use chorus_config::HostConfig;
use clap::{Parser, Subcommand};

mod commands;
mod input;

#[derive(Parser)]
#[command(
    name = "chorus",
    about = "Chorus — a conversational host with pluggable actions",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.chorus/config.toml)
    #[arg(short, long, global = true, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured models
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Discover actions and list their descriptors
    Actions,

    /// Write a default config and descriptor file
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => HostConfig::load_with_env(path),
        None => HostConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

/// Log level used when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(cli.verbose)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Chat { message } => {
            let config = load_config(cli.config.as_ref())?;
            commands::chat::run(config, message).await?
        }
        Commands::Actions => {
            let config = load_config(cli.config.as_ref())?;
            commands::actions::run(config).await?
        }
        Commands::Init { force } => commands::init::run(cli.config, force).await?,
    }

    Ok(())
}
