//! Prism - unified CLI entrypoint.
//!
//! Usage:
//!   prism start --config config/prism.toml
//!   prism init --path config/prism.toml
//!   prism check-config --config config/prism.toml

use anyhow::Result;
use clap::Parser;
use prism::cli::commands::{run_check_config, run_init, run_start};
use prism::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Init(args) => run_init(args),
        Commands::CheckConfig(args) => run_check_config(args),
    }
}
