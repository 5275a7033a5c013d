//! Test helpers for the pipeline tests.
//!
//! Provides `ShipperTestContext` which manages temporary source, remote,
//! and data directories, plus scriptable store, metrics, and disk probe
//! doubles for driving the uploader and reclaimer without a real remote.

use std::{
  collections::{HashMap, VecDeque},
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
  time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use filetime::FileTime;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    DiskUsageProbe, WatcherTask,
    handle::UploaderHandle,
    message::ReadyFile,
    uploader::{self, DrainOutcome},
  },
  metrics::MetricsSink,
  remote::{BlobStore, StoreError},
  state::StateStore,
};
use logship_core::{Config, Fingerprint, config::SourceConfig};

/// Test context owning the temp directories and a config wired to them,
/// with timings cranked down so tests settle in seconds.
pub struct ShipperTestContext {
  /// Watched source directory (label "app", pattern "*.log")
  pub source_dir: TempDir,
  /// Destination for the dir store backend
  pub remote_dir: TempDir,
  /// Queue and registry live here
  pub data_dir: TempDir,
  /// Config pointing one source at source_dir; tests tweak before use
  pub config: Config,
}

impl ShipperTestContext {
  pub fn new() -> Self {
    let source_dir = TempDir::new().expect("create source temp dir");
    let remote_dir = TempDir::new().expect("create remote temp dir");
    let data_dir = TempDir::new().expect("create data temp dir");

    let mut config = Config::default();
    config.sources = vec![SourceConfig {
      root: source_dir.path().to_path_buf(),
      label: "app".to_string(),
      pattern: "*.log".to_string(),
      recursive: false,
      allow_deletion: false,
    }];
    // Files settle after a second and retries are immediately eligible
    config.watcher.stability_secs = 1;
    config.watcher.sweep_interval_ms = 50;
    config.upload.parallel_uploads = 2;
    config.upload.retry_base_secs = 0;
    config.upload.retry_cap_secs = 1;
    config.upload.poll_secs = 1;
    config.remote.root = remote_dir.path().to_path_buf();

    Self {
      source_dir,
      remote_dir,
      data_dir,
      config,
    }
  }

  pub fn open_state(&self) -> Arc<StateStore> {
    Arc::new(StateStore::open(self.data_dir.path()).expect("open state store"))
  }

  /// Write a file into the source directory, creating parents as needed.
  pub fn write_log(&self, name: &str, content: &str) -> PathBuf {
    let path = self.source_dir.path().join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(&path, content).expect("write log file");
    path
  }

  /// Push a file's mtime into the past.
  pub fn backdate_secs(&self, path: &Path, secs: u64) {
    let then = SystemTime::now() - Duration::from_secs(secs);
    filetime::set_file_mtime(path, FileTime::from_system_time(then)).expect("set mtime");
  }

  pub fn fingerprint(&self, path: &Path) -> Fingerprint {
    Fingerprint::of_path(path).expect("fingerprint file")
  }
}

/// Spawn a WatcherTask over `config`.
///
/// Returns the ready-file channel, the cancellation token, and the config
/// sender that keeps live reload working for the task's lifetime.
pub fn spawn_watcher(config: Config) -> (mpsc::Receiver<ReadyFile>, CancellationToken, watch::Sender<Arc<Config>>) {
  let (config_tx, config_rx) = watch::channel(Arc::new(config));
  let (ready_tx, ready_rx) = mpsc::channel(64);
  let cancel = CancellationToken::new();
  let task = WatcherTask::new(config_rx, UploaderHandle::new(ready_tx), cancel.clone()).expect("spawn watcher");
  tokio::spawn(task.run());
  (ready_rx, cancel, config_tx)
}

/// One full queue drain with a fresh cancellation token.
pub async fn drain(
  config: &Arc<Config>,
  state: &Arc<StateStore>,
  store: &Arc<dyn BlobStore>,
  metrics: &Arc<dyn MetricsSink>,
) -> DrainOutcome {
  uploader::drain_queue(config, state, store, metrics, &CancellationToken::new()).await
}

// ============================================================================
// Doubles
// ============================================================================

/// Scriptable in-memory blob store.
///
/// Scripts are keyed by source file name: a file can fail transiently a
/// fixed number of times, or be rejected permanently on every attempt.
#[derive(Default)]
pub struct MockStore {
  puts: AtomicUsize,
  lists: AtomicUsize,
  stored: Mutex<Vec<String>>,
  listing: Mutex<Vec<String>>,
  transient: Mutex<HashMap<String, usize>>,
  permanent: Mutex<Vec<String>>,
}

impl MockStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Fail the next `times` puts for `name` with a retryable error.
  pub fn fail_transient(&self, name: &str, times: usize) {
    self.transient.lock().unwrap().insert(name.to_string(), times);
  }

  /// Reject every put for `name` with a non-retryable error.
  pub fn fail_permanent(&self, name: &str) {
    self.permanent.lock().unwrap().push(name.to_string());
  }

  /// Keys every subsequent list() call returns.
  pub fn preload_listing(&self, keys: &[&str]) {
    *self.listing.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
  }

  pub fn put_count(&self) -> usize {
    self.puts.load(Ordering::SeqCst)
  }

  pub fn list_count(&self) -> usize {
    self.lists.load(Ordering::SeqCst)
  }

  /// Keys of successful puts, in completion order.
  pub fn stored_keys(&self) -> Vec<String> {
    self.stored.lock().unwrap().clone()
  }
}

fn key_names_file(key: &str, name: &str) -> bool {
  key.contains(&format!("/{name}."))
}

#[async_trait]
impl BlobStore for MockStore {
  async fn put(&self, key: &str, _src: &Path) -> Result<(), StoreError> {
    self.puts.fetch_add(1, Ordering::SeqCst);

    if self.permanent.lock().unwrap().iter().any(|name| key_names_file(key, name)) {
      return Err(StoreError::InvalidDestination {
        key: key.to_string(),
        reason: "scripted rejection".to_string(),
      });
    }

    let mut transient = self.transient.lock().unwrap();
    if let Some(left) = transient
      .iter_mut()
      .find_map(|(name, left)| key_names_file(key, name).then_some(left))
      && *left > 0
    {
      *left -= 1;
      return Err(StoreError::Unavailable("scripted outage".to_string()));
    }
    drop(transient);

    self.stored.lock().unwrap().push(key.to_string());
    Ok(())
  }

  async fn list(&self, _prefix: &str, _from: NaiveDate, _to: NaiveDate) -> Result<Vec<String>, StoreError> {
    self.lists.fetch_add(1, Ordering::SeqCst);
    Ok(self.listing.lock().unwrap().clone())
  }
}

/// Metrics sink that just counts.
#[derive(Default)]
pub struct CountingMetrics {
  uploads: AtomicU64,
  bytes: AtomicU64,
  failures: AtomicU64,
}

impl CountingMetrics {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn uploads(&self) -> u64 {
    self.uploads.load(Ordering::SeqCst)
  }

  pub fn bytes(&self) -> u64 {
    self.bytes.load(Ordering::SeqCst)
  }

  pub fn failures(&self) -> u64 {
    self.failures.load(Ordering::SeqCst)
  }
}

impl MetricsSink for CountingMetrics {
  fn record_success(&self, bytes: u64) {
    self.uploads.fetch_add(1, Ordering::SeqCst);
    self.bytes.fetch_add(bytes, Ordering::SeqCst);
  }

  fn record_failure(&self) {
    self.failures.fetch_add(1, Ordering::SeqCst);
  }

  fn flush(&self) {}
}

/// Disk probe fed from a script of readings; the last reading repeats.
pub struct FakeProbe {
  readings: Mutex<VecDeque<f64>>,
}

impl FakeProbe {
  pub fn new(readings: &[f64]) -> Self {
    Self {
      readings: Mutex::new(readings.iter().copied().collect()),
    }
  }
}

impl DiskUsageProbe for FakeProbe {
  fn usage_fraction(&self, _path: &Path) -> Option<f64> {
    let mut readings = self.readings.lock().unwrap();
    if readings.len() > 1 {
      readings.pop_front()
    } else {
      readings.front().copied()
    }
  }
}

/// Wait for a condition to become true, with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(25);

  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}
