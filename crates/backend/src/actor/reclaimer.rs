//! Local disk reclamation.
//!
//! Three policies free space, strictly in the operator's control:
//! after-upload deletion once an upload is `keep_days` old, a daily
//! age-based sweep of anything older than `max_age_days`, and emergency
//! deletion of the oldest uploaded files when disk usage crosses the
//! threshold. Every delete, whatever the policy, goes through the same
//! [`guard::clearance`] gates and skips files with an upload in flight.
//!
//! Registry entries survive local deletion on purpose: dedup keeps
//! working until retention ages them out.

use chrono::{Local, Utc};
use logship_core::Config;
use logship_core::config::parse_hhmm;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use super::message::ReclaimEvent;
use crate::guard;
use crate::schedule::{self, RunMode};
use crate::state::{RegistryEntry, StateStore};

// ============================================================================
// Disk usage probe
// ============================================================================

/// Reports how full the filesystem holding `path` is.
pub trait DiskUsageProbe: Send + Sync {
  /// Usage as a fraction in 0..=1, or None when it cannot be measured.
  fn usage_fraction(&self, path: &Path) -> Option<f64>;
}

/// statvfs-backed probe
pub struct StatvfsProbe;

impl DiskUsageProbe for StatvfsProbe {
  #[cfg(unix)]
  fn usage_fraction(&self, path: &Path) -> Option<f64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
      return None;
    }

    let total = stats.f_blocks as f64 * stats.f_frsize as f64;
    if total <= 0.0 {
      return None;
    }
    let avail = stats.f_bavail as f64 * stats.f_frsize as f64;
    Some(((total - avail) / total).clamp(0.0, 1.0))
  }

  #[cfg(not(unix))]
  fn usage_fraction(&self, _path: &Path) -> Option<f64> {
    None
  }
}

// ============================================================================
// Policies
// ============================================================================

/// Delete `path` on behalf of whichever source claims it, if every gate
/// allows it. Returns true only when the file was actually removed.
pub(crate) fn try_delete(config: &Config, state: &StateStore, path: &Path, policy: &str) -> bool {
  let Some(source) = config.source_for(path) else {
    debug!(path = %path.display(), "No source claims file, not deleting");
    return false;
  };
  if state.path_in_flight(path) {
    debug!(path = %path.display(), "Upload in flight, not deleting");
    return false;
  }
  if let Err(refusal) = guard::clearance(path, source) {
    debug!(path = %path.display(), policy, %refusal, "Deletion refused");
    return false;
  }

  match std::fs::remove_file(path) {
    Ok(()) => {
      info!(path = %path.display(), policy, "Deleted local file");
      true
    }
    Err(e) if e.kind() == ErrorKind::NotFound => {
      trace!(path = %path.display(), "File already gone");
      false
    }
    Err(e) => {
      warn!(path = %path.display(), error = %e, "Failed to delete file");
      false
    }
  }
}

/// Delete local copies of uploads at least `keep_days` old.
pub(crate) async fn after_upload_sweep(config: &Config, state: &StateStore) -> usize {
  if !config.disk.after_upload_enabled {
    return 0;
  }
  let keep = chrono::Duration::days(config.disk.keep_days);
  let now = Utc::now();
  let mut deleted = 0usize;

  for entry in state.registry_snapshot().await {
    if now.signed_duration_since(entry.uploaded_at) < keep {
      continue;
    }
    // Only the exact uploaded content may go; a rotated or appended file
    // under the same name must survive.
    if !entry.fingerprint.matches_disk() {
      continue;
    }
    if try_delete(config, state, &entry.fingerprint.path, "after-upload") {
      deleted += 1;
    }
  }

  if deleted > 0 {
    info!(deleted, "After-upload sweep removed local copies");
  }
  deleted
}

/// Delete any matching file older than `max_age_days`, uploaded or not.
pub(crate) async fn age_sweep(config: &Config, state: &StateStore) -> usize {
  if !config.disk.age_based_enabled {
    return 0;
  }
  let max_age = Duration::from_secs(config.disk.max_age_days.max(1) as u64 * 86_400);
  let mut deleted = 0usize;

  for source in &config.sources {
    let depth = if source.recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(&source.root)
      .max_depth(depth)
      .into_iter()
      .filter_map(|e| e.ok())
    {
      if !entry.file_type().is_file() {
        continue;
      }
      let path = entry.path();
      let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        continue;
      };
      if !source.pattern_matches(name) {
        continue;
      }

      let old_enough = entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.elapsed().ok())
        .map(|age| age >= max_age)
        .unwrap_or(false);
      if !old_enough {
        continue;
      }

      if try_delete(config, state, path, "age") {
        deleted += 1;
      }
    }
  }

  if deleted > 0 {
    info!(deleted, "Age sweep removed old files");
  }
  deleted
}

/// When a source's filesystem crosses the usage threshold, delete its
/// oldest uploaded files until usage drops back under. Files that were
/// never uploaded are not candidates.
pub(crate) async fn emergency_sweep(config: &Config, state: &StateStore, probe: &dyn DiskUsageProbe) -> usize {
  if !config.disk.emergency_enabled {
    return 0;
  }
  let threshold = config.disk.emergency_threshold;
  let mut deleted = 0usize;

  for source in &config.sources {
    let Some(usage) = probe.usage_fraction(&source.root) else {
      continue;
    };
    if usage < threshold {
      continue;
    }
    warn!(
      root = %source.root.display(),
      usage_pct = (usage * 100.0) as u64,
      "Disk usage over emergency threshold"
    );

    let mut uploaded: Vec<RegistryEntry> = state
      .registry_snapshot()
      .await
      .into_iter()
      .filter(|e| source.claims(&e.fingerprint.path))
      .collect();
    uploaded.sort_by_key(|e| e.uploaded_at);

    let mut recovered = false;
    for entry in uploaded {
      if !entry.fingerprint.matches_disk() {
        continue;
      }
      if !try_delete(config, state, &entry.fingerprint.path, "emergency") {
        continue;
      }
      deleted += 1;

      match probe.usage_fraction(&source.root) {
        Some(now_usage) if now_usage < threshold => {
          info!(root = %source.root.display(), deleted, "Disk usage back under threshold");
          recovered = true;
          break;
        }
        Some(_) => {}
        None => break,
      }
    }
    if !recovered {
      warn!(
        root = %source.root.display(),
        deleted,
        "Disk usage still over threshold after emergency sweep"
      );
    }
  }
  deleted
}

/// Remove rotated daemon log files past retention. 0 keeps them forever.
pub(crate) fn cleanup_old_logs(log_dir: &Path, retention_days: u64) {
  if retention_days == 0 {
    return;
  }
  let cutoff = Duration::from_secs(retention_days * 86_400);
  let Ok(entries) = std::fs::read_dir(log_dir) else {
    return;
  };

  let mut removed = 0usize;
  for entry in entries.flatten() {
    let path = entry.path();
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    if !name.starts_with("logship.log") {
      continue;
    }
    let expired = entry
      .metadata()
      .ok()
      .and_then(|m| m.modified().ok())
      .and_then(|t| t.elapsed().ok())
      .map(|age| age >= cutoff)
      .unwrap_or(false);
    if expired && std::fs::remove_file(&path).is_ok() {
      removed += 1;
    }
  }
  if removed > 0 {
    debug!(removed, "Removed old daemon log files");
  }
}

// ============================================================================
// Task
// ============================================================================

/// Long-lived reclamation task.
pub struct ReclaimerTask {
  config: watch::Receiver<Arc<Config>>,
  state: Arc<StateStore>,
  probe: Arc<dyn DiskUsageProbe>,
  cancel: CancellationToken,
  event_rx: mpsc::Receiver<ReclaimEvent>,
  log_dir: Option<PathBuf>,
}

impl ReclaimerTask {
  pub fn new(
    config: watch::Receiver<Arc<Config>>,
    state: Arc<StateStore>,
    probe: Arc<dyn DiskUsageProbe>,
    cancel: CancellationToken,
    event_rx: mpsc::Receiver<ReclaimEvent>,
    log_dir: Option<PathBuf>,
  ) -> Self {
    Self {
      config,
      state,
      probe,
      cancel,
      event_rx,
      log_dir,
    }
  }

  pub async fn run(mut self) {
    let initial = self.config.borrow().clone();

    let mut sweep = tokio::time::interval(Duration::from_secs(initial.disk.sweep_interval_secs.max(1)));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut emergency = tokio::time::interval(Duration::from_secs(initial.disk.emergency_poll_secs.max(1)));
    emergency.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The immediate first tick doubles as the startup retention sweep.
    let mut registry = tokio::time::interval(Duration::from_secs(initial.registry.sweep_interval_hours.max(1) * 3600));
    registry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Cheap once-a-minute check for the daily age sweep target
    let mut daily = tokio::time::interval(Duration::from_secs(60));
    daily.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_age_sweep = Local::now().naive_local();

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!("Reclaimer shutting down");
          break;
        }

        Some(event) = self.event_rx.recv() => {
          self.on_event(event);
        }

        _ = registry.tick() => {
          let config = self.config.borrow().clone();
          match self.state.sweep_registry(Utc::now(), config.registry.retention_days).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Registry retention sweep"),
            Err(e) => warn!(error = %e, "Registry sweep failed"),
          }
        }

        _ = sweep.tick() => {
          let config = self.config.borrow().clone();
          after_upload_sweep(&config, &self.state).await;
        }

        _ = emergency.tick() => {
          let config = self.config.borrow().clone();
          emergency_sweep(&config, &self.state, self.probe.as_ref()).await;
        }

        _ = daily.tick() => {
          let config = self.config.borrow().clone();
          let Some(at) = parse_hhmm(&config.disk.age_sweep_at) else { continue };
          let now = Local::now().naive_local();
          if schedule::run_due(now, last_age_sweep, &RunMode::Daily(at)) {
            last_age_sweep = now;
            age_sweep(&config, &self.state).await;
            if let Some(log_dir) = &self.log_dir {
              cleanup_old_logs(log_dir, config.daemon.log_retention_days);
            }
          }
        }
      }
    }
  }

  /// keep_days = 0 deletes the local copy as soon as its upload lands.
  fn on_event(&self, event: ReclaimEvent) {
    let config = self.config.borrow().clone();
    match event {
      ReclaimEvent::Uploaded { fingerprint, .. } => {
        if !config.disk.after_upload_enabled || config.disk.keep_days != 0 {
          return;
        }
        if !fingerprint.matches_disk() {
          return;
        }
        try_delete(&config, &self.state, &fingerprint.path, "after-upload");
      }
    }
  }
}
