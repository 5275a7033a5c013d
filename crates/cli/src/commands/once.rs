//! Once command

use anyhow::{Context, Result};
use logship::{Daemon, RuntimeConfig};
use std::path::Path;

/// Run a single scan-and-drain pass and print what happened
pub async fn cmd_once(config_path: Option<&Path>) -> Result<()> {
  let runtime = RuntimeConfig::load(config_path).context("Failed to load configuration")?;
  let report = Daemon::new(runtime).run_once().await.context("Single pass failed")?;

  println!("Enqueued:   {} settled files", report.enqueued);
  println!("Uploaded:   {}", report.uploaded);
  println!("Failed:     {}", report.failed);
  println!("Deleted:    {} local files", report.deleted);
  println!("Swept:      {} registry entries", report.swept);

  if report.failed > 0 {
    std::process::exit(1);
  }
  Ok(())
}
