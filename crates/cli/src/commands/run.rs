//! Run command

use anyhow::{Context, Result};
use logship::{Daemon, RuntimeConfig};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

/// Environment marker set on the detached child so it does not respawn again
pub const DAEMONIZED_ENV: &str = "LOGSHIP_DAEMONIZED";

/// Run the shipper until signalled
pub async fn cmd_run(config_path: Option<&Path>) -> Result<()> {
  let runtime = RuntimeConfig::load(config_path).context("Failed to load configuration")?;

  info!("Starting logship daemon");
  Daemon::new(runtime).run().await.context("Failed to run daemon")?;

  Ok(())
}

/// Re-exec ourselves detached from the terminal, then return so the
/// parent can exit.
pub fn respawn_detached(config: Option<&Path>) -> Result<()> {
  let exe = std::env::current_exe().context("Failed to locate current executable")?;

  let mut command = Command::new(&exe);
  command.arg("run").arg("--background");
  if let Some(path) = config {
    command.arg("--config").arg(path);
  }

  let child = command
    .env(DAEMONIZED_ENV, "1")
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .context("Failed to spawn background process")?;

  println!("logship running in the background (pid {})", child.id());
  println!("Logs: {:?}", logship::dirs::default_log_dir());
  Ok(())
}
