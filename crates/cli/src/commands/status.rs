//! Status command

use anyhow::{Context, Result};
use chrono::Utc;
use logship::state::{DedupRegistry, IngestQueue, RetryPolicy, StatePaths};
use logship_core::Config;

/// Summarize persisted state without talking to a running daemon.
///
/// Counts come straight from the state files, so they are accurate at
/// read time even while a daemon is mid-drain.
pub fn cmd_status() -> Result<()> {
  let config = Config::load(None).context("Failed to load configuration")?;
  let data_dir = logship::dirs::default_data_dir();
  let paths = StatePaths::new(&data_dir);

  let queue = IngestQueue::load(&paths.queue);
  let registry = DedupRegistry::load(&paths.registry);
  let policy = RetryPolicy::from_config(&config.upload);
  let now = Utc::now();

  let mut due = 0usize;
  let mut backing_off = 0usize;
  for entry in queue.iter() {
    if policy.is_eligible(entry, now) {
      due += 1;
    } else {
      backing_off += 1;
    }
  }

  println!("Logship Status");
  println!("==============\n");

  println!("Data dir:       {:?}", data_dir);
  println!("Sources:        {} configured", config.sources.len());
  println!();

  println!("Queue:          {} pending", queue.len());
  println!("  due now:      {}", due);
  println!("  backing off:  {}", backing_off);

  if backing_off > 0 {
    for entry in queue.iter().filter(|e| !policy.is_eligible(e, now)).take(5) {
      println!(
        "                - {:?} (attempt {})",
        entry.fingerprint.path, entry.attempts
      );
    }
    if backing_off > 5 {
      println!("                ... and {} more", backing_off - 5);
    }
  }
  println!();

  println!("Registry:       {} uploaded files remembered", registry.len());

  Ok(())
}
