//! Daemon lifecycle management.
//!
//! # Architecture
//!
//! ```text
//! Daemon (Supervisor)
//!   ├── WatcherTask    (source dir watches → settled files)
//!   ├── UploaderTask   (queue owner: dispatch, retry, dedup)
//!   └── ReclaimerTask  (disk policies, registry retention)
//! ```
//!
//! # Lifecycle
//!
//! 1. Open the state store and reconcile the queue against the disk
//! 2. Build the remote store and spawn the three tasks
//! 3. Wire signals: INT/TERM cancel, HUP reloads config
//! 4. Run until cancelled or a task dies
//! 5. Shut down in order: watcher first so no new files arrive, then the
//!    uploader with its grace period, then the reclaimer

use chrono::Utc;
use logship_core::config::ConfigError;
use logship_core::{Config, Fingerprint};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::actor::handle::{ReclaimerHandle, UploaderHandle};
use crate::actor::{ReclaimerTask, StatvfsProbe, UploaderTask, WatcherError, WatcherTask, reclaimer, uploader};
use crate::dirs;
use crate::metrics::{LogMetrics, MetricsSink};
use crate::remote::{BlobStore, StoreError};
use crate::state::{StateError, StateStore};

// ============================================================================
// Configuration
// ============================================================================

/// Daemon runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Base directory for queue, registry, and logs
  pub data_dir: PathBuf,
  /// Full validated configuration
  pub config: Config,
  /// Where the config came from, for reloads
  pub config_path: Option<PathBuf>,
}

impl RuntimeConfig {
  /// Load and validate configuration for a daemon run.
  pub fn load(config_path: Option<&Path>) -> Result<Self, DaemonError> {
    let config = Config::load(config_path)?;
    config.ensure_valid()?;
    Ok(Self {
      data_dir: dirs::default_data_dir(),
      config,
      config_path: config_path.map(|p| p.to_path_buf()),
    })
  }
}

/// Errors that stop the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Watch(#[from] WatcherError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("Daemon I/O error: {0}")]
  Io(#[from] std::io::Error),
}

// ============================================================================
// Daemon
// ============================================================================

/// Supervisor for the long-running shipper process.
pub struct Daemon {
  runtime: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime: RuntimeConfig) -> Self {
    Self { runtime }
  }

  pub async fn run(self) -> Result<(), DaemonError> {
    let config = Arc::new(self.runtime.config.clone());
    info!(
      sources = config.sources.len(),
      data_dir = %self.runtime.data_dir.display(),
      "Daemon starting"
    );

    let state = Arc::new(StateStore::open(&self.runtime.data_dir)?);
    let dropped = state.reconcile().await?;
    if dropped > 0 {
      info!(dropped, "Dropped stale queue entries at startup");
    }

    let store = <dyn BlobStore>::from_config(&config.remote)?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(LogMetrics::new());

    let cancel = CancellationToken::new();
    let (config_tx, config_rx) = watch::channel(config.clone());
    let (ready_tx, ready_rx) = mpsc::channel(256);
    let (reclaim_tx, reclaim_rx) = mpsc::channel(256);

    let watcher = WatcherTask::new(config_rx.clone(), UploaderHandle::new(ready_tx), cancel.clone())?;
    let mut watcher_join = tokio::spawn(watcher.run());

    let uploader_task = UploaderTask::new(
      config_rx.clone(),
      state.clone(),
      store.clone(),
      metrics.clone(),
      ReclaimerHandle::new(reclaim_tx),
      cancel.clone(),
      ready_rx,
    );
    let mut uploader_join = tokio::spawn(uploader_task.run());

    let reclaimer_task = ReclaimerTask::new(
      config_rx,
      state.clone(),
      Arc::new(StatvfsProbe),
      cancel.clone(),
      reclaim_rx,
      Some(dirs::default_log_dir()),
    );
    let mut reclaimer_join = tokio::spawn(reclaimer_task.run());

    spawn_signal_handlers(&cancel, config_tx, config.clone(), self.runtime.config_path.clone());

    // Supervise: any task ending on its own is a failure
    let mut watcher_done = false;
    let mut uploader_done = false;
    let mut reclaimer_done = false;

    tokio::select! {
      _ = cancel.cancelled() => {}
      res = &mut watcher_join => {
        watcher_done = true;
        note_task_exit("watcher", res);
        cancel.cancel();
      }
      res = &mut uploader_join => {
        uploader_done = true;
        note_task_exit("uploader", res);
        cancel.cancel();
      }
      res = &mut reclaimer_join => {
        reclaimer_done = true;
        note_task_exit("reclaimer", res);
        cancel.cancel();
      }
    }

    cancel.cancel();
    info!("Daemon shutting down");

    // Watcher first, so nothing new lands in the queue mid-teardown
    if !watcher_done {
      note_task_exit("watcher", (&mut watcher_join).await);
    }

    if !uploader_done {
      let grace = Duration::from_secs(config.upload.shutdown_grace_secs);
      match tokio::time::timeout(grace, &mut uploader_join).await {
        Ok(res) => note_task_exit("uploader", res),
        Err(_) => {
          warn!(
            grace_secs = grace.as_secs(),
            "In-flight uploads did not finish in time, abandoning; files stay queued"
          );
          uploader_join.abort();
        }
      }
    }

    if !reclaimer_done {
      note_task_exit("reclaimer", (&mut reclaimer_join).await);
    }

    metrics.flush();
    info!("Daemon stopped");
    Ok(())
  }

  // ==========================================================================
  // One-shot mode
  // ==========================================================================

  /// Run a single pass without the long-lived tasks: scan, drain, reclaim,
  /// sweep. Files younger than the settled threshold are left for the next
  /// invocation instead of being waited on.
  pub async fn run_once(self) -> Result<OnceReport, DaemonError> {
    let config = Arc::new(self.runtime.config.clone());
    let state = Arc::new(StateStore::open(&self.runtime.data_dir)?);
    let mut report = OnceReport::default();

    let dropped = state.reconcile().await?;
    if dropped > 0 {
      info!(dropped, "Dropped stale queue entries");
    }

    let threshold = Duration::from_secs(config.watcher.startup_settled_secs);
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

        let settled = entry
          .metadata()
          .ok()
          .and_then(|m| m.modified().ok())
          .and_then(|t| t.elapsed().ok())
          .map(|age| age >= threshold)
          .unwrap_or(false);
        if !settled {
          continue;
        }

        let Ok(fingerprint) = Fingerprint::of_path(path) else {
          continue;
        };
        if state.is_uploaded(&fingerprint.key()).await {
          continue;
        }
        if state.enqueue(fingerprint, Utc::now()).await? {
          report.enqueued += 1;
        }
      }
    }

    let store = <dyn BlobStore>::from_config(&config.remote)?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(LogMetrics::new());
    let cancel = CancellationToken::new();

    let outcome = uploader::drain_queue(&config, &state, &store, &metrics, &cancel).await;
    report.uploaded = outcome.uploaded.len();
    report.failed = outcome.failures;

    report.deleted = reclaimer::after_upload_sweep(&config, &state).await;
    report.deleted += reclaimer::age_sweep(&config, &state).await;

    report.swept = state.sweep_registry(Utc::now(), config.registry.retention_days).await?;

    metrics.flush();
    Ok(report)
  }
}

/// What a single `once` pass did
#[derive(Debug, Default)]
pub struct OnceReport {
  pub enqueued: usize,
  pub uploaded: usize,
  pub failed: usize,
  pub deleted: usize,
  pub swept: usize,
}

fn note_task_exit(name: &str, res: Result<(), tokio::task::JoinError>) {
  match res {
    Ok(()) => warn!(task = name, "Task ended"),
    Err(e) if e.is_cancelled() => {}
    Err(e) => error!(task = name, error = %e, "Task panicked"),
  }
}

// ============================================================================
// Signals
// ============================================================================

fn spawn_signal_handlers(
  cancel: &CancellationToken,
  config_tx: watch::Sender<Arc<Config>>,
  current: Arc<Config>,
  config_path: Option<PathBuf>,
) {
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if signal::ctrl_c().await.is_ok() {
        info!("Received interrupt, shutting down");
        cancel.cancel();
      }
    });
  }

  #[cfg(unix)]
  {
    let cancel = cancel.clone();
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
      Ok(mut term) => {
        tokio::spawn(async move {
          if term.recv().await.is_some() {
            info!("Received termination signal, shutting down");
            cancel.cancel();
          }
        });
      }
      Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
    }
  }

  #[cfg(unix)]
  {
    match signal::unix::signal(signal::unix::SignalKind::hangup()) {
      Ok(mut hup) => {
        tokio::spawn(async move {
          let mut current = current;
          while hup.recv().await.is_some() {
            match Config::load(config_path.as_deref()).and_then(|c| c.ensure_valid().map(|()| c)) {
              Ok(new_config) => {
                if new_config.sources != current.sources {
                  warn!("Source changes require a restart to take effect");
                }
                let new_config = Arc::new(new_config);
                current = new_config.clone();
                if config_tx.send(new_config).is_err() {
                  break;
                }
                info!("Reloaded configuration");
              }
              Err(e) => warn!(error = %e, "Reload failed, keeping current config"),
            }
          }
        });
      }
      Err(e) => warn!(error = %e, "Failed to install SIGHUP handler"),
    }
  }

  #[cfg(not(unix))]
  {
    let _ = (config_tx, current, config_path);
  }
}
