//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Prism - multiplexed cache and queue proxy.
#[derive(Parser)]
#[command(name = "prism")]
#[command(version)]
#[command(about = "Prism proxy server and tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start(StartArgs),

    /// Write a starter configuration file
    Init(InitArgs),

    /// Validate a configuration file
    CheckConfig(CheckConfigArgs),
}

// -----------------------------------------------------------------------------
// Start command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/prism.toml")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Init command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the starter configuration
    #[arg(long, default_value = "config/prism.toml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

// -----------------------------------------------------------------------------
// Check-config command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/prism.toml")]
    pub config: PathBuf,
}
