//! Portalcast CLI
//!
//! Wayland screen capture through xdg-desktop-portal and PipeWire.
//!
//! # Usage
//!
//! ```bash
//! # Capture a monitor picked in the portal dialog
//! portalcast cast --size 1080p60
//!
//! # Flip between two sizes every two seconds
//! portalcast cast --renegotiate format --interval-ms 2000
//!
//! # Read a node from the local daemon, no portal
//! portalcast cast --no-portal 42
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Portalcast - Wayland screencast consumer
#[derive(Parser)]
#[command(name = "portalcast")]
#[command(version)]
#[command(about = "Wayland screencast consumer for xdg-desktop-portal and PipeWire", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate a screencast and present its frames
    Cast(commands::CastArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),

    /// Show portal and PipeWire information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("portalcast_core={}", level).parse()?)
                .add_directive(format!("portalcast={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Cast(args) => commands::cast(args).await?,
        Commands::Config(args) => commands::config(args).await?,
        Commands::Info => commands::info().await?,
    }

    Ok(())
}
