//! Command runners.

mod start;

pub use start::run_start;

use crate::cli::args::{CheckConfigArgs, InitArgs};
use crate::core::config::Config;
use anyhow::{bail, Context, Result};
use std::fs;

const STARTER_CONFIG: &str = r#"# Prism configuration.

[listener]
bind = "127.0.0.1:7574"

[proxy]
member_id = 1
heartbeat_interval_secs = 30
transfer_threshold = 16384
max_frame_bytes = 8388608

[telemetry]
bind = "127.0.0.1:7575"
log_level = "info"
"#;

/// Write a starter configuration file.
pub fn run_init(args: InitArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            args.path.display()
        );
    }
    if let Some(parent) = args.path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&args.path, STARTER_CONFIG)
        .with_context(|| format!("failed to write {}", args.path.display()))?;
    println!("wrote {}", args.path.display());
    Ok(())
}

/// Parse and validate a configuration file.
pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load_from_path(&args.config)?;
    println!(
        "ok: listener {} telemetry {}",
        config.listener.bind,
        config.telemetry.bind.as_deref().unwrap_or("disabled")
    );
    Ok(())
}
