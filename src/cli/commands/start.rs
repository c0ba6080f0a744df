//! Start command - launches the prism proxy server.

use crate::cli::args::StartArgs;
use crate::core::config::Config;
use crate::core::runtime::Runtime;
use crate::core::time::SystemClock;
use crate::ops::telemetry;
use anyhow::Result;

pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = Config::load_from_path(&args.config)?;
    let log_handle = telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    let mut runtime = Runtime::new(config, SystemClock, Some(log_handle))?;
    runtime.run().await
}
