//! Filesystem watcher that emits files once they stop changing.
//!
//! notify's callback runs on its own thread, so events cross into the
//! async world through a bounded channel via `blocking_send`. Every create
//! or modify stamps the path in a pending map; a periodic sweep emits
//! paths whose last event is older than the stability window. Emission is
//! per fingerprint: a file that changes after settling comes back as a new
//! fingerprint and goes around again.
//!
//! At startup the scan emits files already older than the settled
//! threshold and credits younger ones into the pending map with their
//! age, so nothing waits longer than it has to.
//!
//! # Lifecycle
//!
//! Shutdown does not flush the pending map. Files still settling are
//! re-detected by the next startup scan, which is cheaper than racing
//! emission against teardown. Renames arrive as modifies of the new path;
//! entries whose path is gone fall out at emit time when the stat fails.

use logship_core::{Config, Fingerprint};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use super::handle::UploaderHandle;
use super::message::ReadyFile;

/// Errors from setting up the filesystem watcher
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("Failed to initialize watch backend: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch {root}: {source}")]
  Watch {
    root: PathBuf,
    #[source]
    source: notify::Error,
  },
}

/// Watches the configured sources and feeds settled files to the uploader.
pub struct WatcherTask {
  config: watch::Receiver<Arc<Config>>,
  uploader: UploaderHandle,
  cancel: CancellationToken,
  /// Paths with recent activity, keyed to their last event time
  pending: HashMap<PathBuf, Instant>,
  event_rx: mpsc::Receiver<notify::Result<notify::Event>>,
  /// Keeps the OS watches registered for as long as the task lives
  _watcher: RecommendedWatcher,
}

impl WatcherTask {
  /// Register watches for every configured source root.
  ///
  /// Source additions and removals require a restart; only the timing
  /// knobs reload live.
  pub fn new(
    config: watch::Receiver<Arc<Config>>,
    uploader: UploaderHandle,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let initial = config.borrow().clone();

    let (event_tx, event_rx) = mpsc::channel(256);
    let mut watcher = notify::recommended_watcher(move |res| {
      // notify runs this on its own thread; blocking_send bridges into
      // the async channel without an executor handle.
      let _ = event_tx.blocking_send(res);
    })
    .map_err(WatcherError::Init)?;

    for source in &initial.sources {
      let mode = if source.recursive {
        RecursiveMode::Recursive
      } else {
        RecursiveMode::NonRecursive
      };
      watcher.watch(&source.root, mode).map_err(|e| WatcherError::Watch {
        root: source.root.clone(),
        source: e,
      })?;
      info!(root = %source.root.display(), label = %source.label, "Watching source");
    }

    Ok(Self {
      config,
      uploader,
      cancel,
      pending: HashMap::new(),
      event_rx,
      _watcher: watcher,
    })
  }

  pub async fn run(mut self) {
    self.startup_scan().await;

    let sweep_ms = self.config.borrow().watcher.sweep_interval_ms.max(10);
    let mut sweep = tokio::time::interval(Duration::from_millis(sweep_ms));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!(pending = self.pending.len(), "Watcher shutting down");
          break;
        }

        Some(res) = self.event_rx.recv() => {
          match res {
            Ok(event) => self.process_event(event),
            Err(e) => warn!(error = %e, "Watch backend error"),
          }
        }

        _ = sweep.tick() => {
          self.flush_settled().await;
        }
      }
    }
  }

  // ==========================================================================
  // Event handling
  // ==========================================================================

  fn process_event(&mut self, event: notify::Event) {
    use notify::EventKind;

    match event.kind {
      EventKind::Create(_) | EventKind::Modify(_) => {
        for path in event.paths {
          self.track(path);
        }
      }
      EventKind::Remove(_) => {
        for path in event.paths {
          if self.pending.remove(&path).is_some() {
            debug!(path = %path.display(), "Dropped removed file from pending");
          }
        }
      }
      _ => {}
    }
  }

  /// Stamp a path in the pending map if a source claims it.
  fn track(&mut self, path: PathBuf) {
    if path.is_dir() {
      return;
    }

    let config = self.config.borrow().clone();
    let Some(source) = config.source_for(&path) else {
      return;
    };
    if !source.claims(&path) {
      return;
    }

    match self.pending.entry(path) {
      std::collections::hash_map::Entry::Occupied(mut entry) => {
        entry.insert(Instant::now());
      }
      std::collections::hash_map::Entry::Vacant(entry) => {
        debug!(path = %entry.key().display(), "Tracking file");
        entry.insert(Instant::now());
      }
    }
  }

  /// Emit every pending path whose last event is older than the stability
  /// window. The window is read fresh each sweep so reloads apply live.
  async fn flush_settled(&mut self) {
    let stability = Duration::from_secs(self.config.borrow().watcher.stability_secs);
    let now = Instant::now();

    let settled: Vec<PathBuf> = self
      .pending
      .iter()
      .filter(|(_, last_event)| now.duration_since(**last_event) >= stability)
      .map(|(path, _)| path.clone())
      .collect();

    for path in settled {
      self.pending.remove(&path);
      self.emit(&path).await;
    }
  }

  async fn emit(&self, path: &Path) {
    let fingerprint = match Fingerprint::of_path(path) {
      Ok(fp) => fp,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        trace!(path = %path.display(), "Settled file vanished before emit");
        return;
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to fingerprint settled file");
        return;
      }
    };

    debug!(path = %path.display(), size = fingerprint.size, "File settled");
    if self.uploader.send(ReadyFile { fingerprint }).await.is_err() {
      warn!(path = %path.display(), "Uploader is gone, dropping ready file");
    }
  }

  // ==========================================================================
  // Startup scan
  // ==========================================================================

  /// Walk every source once: emit files old enough to count as settled,
  /// credit the rest into the pending map with the age they already have.
  async fn startup_scan(&mut self) {
    let config = self.config.borrow().clone();
    let threshold = Duration::from_secs(config.watcher.startup_settled_secs);
    let mut emitted = 0usize;
    let mut deferred = 0usize;

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

        let age = entry
          .metadata()
          .ok()
          .and_then(|m| m.modified().ok())
          .and_then(|t| t.elapsed().ok());

        match age {
          Some(age) if age >= threshold => {
            self.emit(path).await;
            emitted += 1;
          }
          _ => {
            // A future-dated mtime proves nothing, so it waits out a full
            // window from now.
            let last_event = age
              .and_then(|a| Instant::now().checked_sub(a))
              .unwrap_or_else(Instant::now);
            self.pending.insert(path.to_path_buf(), last_event);
            deferred += 1;
          }
        }
      }
    }

    info!(emitted, deferred, "Startup scan complete");
  }
}
