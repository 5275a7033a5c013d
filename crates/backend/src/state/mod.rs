//! Durable daemon state: the upload queue and the dedup registry.
//!
//! Both live as JSON under the data dir and are rewritten through a
//! tmp-then-rename dance with a backup copy, so the live file is always a
//! complete snapshot, old or new, never a torn write. [`StateStore`] is the
//! shared handle the tasks mutate; every mutation persists before returning.

mod queue;
mod registry;

pub use queue::{IngestQueue, PendingFile, RetryPolicy};
pub use registry::{DedupRegistry, RegistryEntry};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use logship_core::Fingerprint;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors from persisting or loading state
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  #[error("State I/O failed at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("State serialization failed: {0}")]
  Serde(#[from] serde_json::Error),
}

// ============================================================================
// Atomic file persistence
// ============================================================================

fn sibling(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(suffix);
  path.with_file_name(name)
}

/// Write `bytes` so the live file is always a complete snapshot: write a
/// tmp sibling, refresh the .bak from the current live file, then rename
/// the tmp into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
  let tmp = sibling(path, ".tmp");
  std::fs::write(&tmp, bytes).map_err(|source| StateError::Io {
    path: tmp.clone(),
    source,
  })?;

  if path.exists() {
    let bak = sibling(path, ".bak");
    if let Err(e) = std::fs::copy(path, &bak) {
      warn!(path = %path.display(), error = %e, "Failed to refresh state backup");
    }
  }

  std::fs::rename(&tmp, path).map_err(|source| StateError::Io {
    path: path.to_path_buf(),
    source,
  })
}

/// Load JSON from `path`, falling back to the .bak sibling when the live
/// file is missing or corrupt. Returns None when neither parses.
pub(crate) fn load_json_with_fallback<T: DeserializeOwned>(path: &Path) -> Option<T> {
  match std::fs::read(path) {
    Ok(bytes) => match serde_json::from_slice(&bytes) {
      Ok(value) => return Some(value),
      Err(e) => warn!(path = %path.display(), error = %e, "State file is corrupt, trying backup"),
    },
    Err(e) if e.kind() == ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), error = %e, "Failed to read state file, trying backup"),
  }

  let bak = sibling(path, ".bak");
  match std::fs::read(&bak) {
    Ok(bytes) => match serde_json::from_slice(&bytes) {
      Ok(value) => {
        info!(path = %bak.display(), "Recovered state from backup copy");
        Some(value)
      }
      Err(e) => {
        warn!(path = %bak.display(), error = %e, "Backup copy is corrupt too");
        None
      }
    },
    Err(e) if e.kind() == ErrorKind::NotFound => None,
    Err(e) => {
      warn!(path = %bak.display(), error = %e, "Failed to read backup copy");
      None
    }
  }
}

// ============================================================================
// Store
// ============================================================================

/// Locations of the state files under the data dir
#[derive(Debug, Clone)]
pub struct StatePaths {
  pub queue: PathBuf,
  pub registry: PathBuf,
}

impl StatePaths {
  pub fn new(data_dir: &Path) -> Self {
    Self {
      queue: data_dir.join("queue.json"),
      registry: data_dir.join("registry.json"),
    }
  }
}

/// A batch of queue entries ready for upload
#[derive(Debug)]
pub struct Batch {
  pub entries: Vec<PendingFile>,
  /// Entries dropped because their file vanished or changed on disk
  pub dropped: usize,
}

/// Shared handle to the queue, the registry, and the in-flight set.
///
/// Lock order is queue before registry; no method takes them the other
/// way around.
pub struct StateStore {
  paths: StatePaths,
  queue: Mutex<IngestQueue>,
  registry: Mutex<DedupRegistry>,
  in_flight: DashMap<String, PathBuf>,
}

impl StateStore {
  /// Open the store, creating the data dir and loading whatever state
  /// survived the last run.
  pub fn open(data_dir: &Path) -> Result<Self, StateError> {
    std::fs::create_dir_all(data_dir).map_err(|source| StateError::Io {
      path: data_dir.to_path_buf(),
      source,
    })?;
    let paths = StatePaths::new(data_dir);
    let queue = IngestQueue::load(&paths.queue);
    let registry = DedupRegistry::load(&paths.registry);
    Ok(Self {
      paths,
      queue: Mutex::new(queue),
      registry: Mutex::new(registry),
      in_flight: DashMap::new(),
    })
  }

  /// Drop queue entries whose file vanished or changed while the daemon
  /// was down. Returns how many were dropped.
  pub async fn reconcile(&self) -> Result<usize, StateError> {
    let mut queue = self.queue.lock().await;
    let vanished = queue.reconcile();
    if vanished.is_empty() {
      return Ok(0);
    }
    queue.persist(&self.paths.queue)?;

    let mut registry = self.registry.lock().await;
    let mut forgot = false;
    for fp in &vanished {
      forgot |= registry.forget(&fp.key());
    }
    if forgot {
      registry.persist(&self.paths.registry)?;
    }
    Ok(vanished.len())
  }

  /// Queue a file for upload. Returns false if it was already queued.
  pub async fn enqueue(&self, fingerprint: Fingerprint, now: DateTime<Utc>) -> Result<bool, StateError> {
    let mut queue = self.queue.lock().await;
    if !queue.enqueue(fingerprint, now) {
      return Ok(false);
    }
    queue.persist(&self.paths.queue)?;
    Ok(true)
  }

  /// Pull up to `limit` entries whose backoff has elapsed, dropping
  /// vanished ones along the way. Pulled entries stay queued until
  /// completion.
  pub async fn next_batch(&self, limit: usize, now: DateTime<Utc>, policy: &RetryPolicy) -> Result<Batch, StateError> {
    let mut queue = self.queue.lock().await;
    let (entries, vanished) = queue.ready_batch(limit, now, policy);
    if !vanished.is_empty() {
      queue.persist(&self.paths.queue)?;
      let mut registry = self.registry.lock().await;
      let mut forgot = false;
      for fp in &vanished {
        forgot |= registry.forget(&fp.key());
      }
      if forgot {
        registry.persist(&self.paths.registry)?;
      }
    }
    Ok(Batch {
      entries,
      dropped: vanished.len(),
    })
  }

  pub async fn pending_entry(&self, key: &str) -> Option<PendingFile> {
    self.queue.lock().await.entry(key).cloned()
  }

  pub async fn queue_len(&self) -> usize {
    self.queue.lock().await.len()
  }

  /// Record a failed attempt; returns the new attempt count.
  pub async fn mark_attempt(&self, key: &str, at: DateTime<Utc>) -> Result<u32, StateError> {
    let mut queue = self.queue.lock().await;
    let Some(attempts) = queue.mark_attempt(key, at) else {
      return Ok(0);
    };
    queue.persist(&self.paths.queue)?;
    Ok(attempts)
  }

  /// Drop an entry from the queue without recording an upload.
  pub async fn remove_pending(&self, key: &str) -> Result<bool, StateError> {
    let mut queue = self.queue.lock().await;
    if !queue.remove(key) {
      return Ok(false);
    }
    queue.persist(&self.paths.queue)?;
    Ok(true)
  }

  /// Mark an upload complete: registry gains the fingerprint, queue loses
  /// it. The registry is persisted first so a crash between the two leans
  /// toward a duplicate check later rather than a lost record.
  pub async fn record_uploaded(&self, fingerprint: Fingerprint, at: DateTime<Utc>) -> Result<(), StateError> {
    let key = fingerprint.key();
    let mut queue = self.queue.lock().await;
    let mut registry = self.registry.lock().await;
    registry.record(fingerprint, at);
    registry.persist(&self.paths.registry)?;
    queue.remove(&key);
    queue.persist(&self.paths.queue)
  }

  /// Remove a file from both the queue and the registry.
  pub async fn purge(&self, key: &str) -> Result<(), StateError> {
    let mut queue = self.queue.lock().await;
    if queue.remove(key) {
      queue.persist(&self.paths.queue)?;
    }
    let mut registry = self.registry.lock().await;
    if registry.forget(key) {
      registry.persist(&self.paths.registry)?;
    }
    Ok(())
  }

  pub async fn is_uploaded(&self, key: &str) -> bool {
    self.registry.lock().await.contains(key)
  }

  pub async fn uploaded_at(&self, key: &str) -> Option<DateTime<Utc>> {
    self.registry.lock().await.get(key).map(|e| e.uploaded_at)
  }

  /// Age out registry entries past retention; returns how many went.
  pub async fn sweep_registry(&self, now: DateTime<Utc>, retention_days: i64) -> Result<usize, StateError> {
    let mut registry = self.registry.lock().await;
    let removed = registry.sweep(now, retention_days);
    if removed > 0 {
      registry.persist(&self.paths.registry)?;
    }
    Ok(removed)
  }

  pub async fn registry_snapshot(&self) -> Vec<RegistryEntry> {
    self.registry.lock().await.entries().cloned().collect()
  }

  // --------------------------------------------------------------------------
  // In-flight uploads
  // --------------------------------------------------------------------------

  /// Claim a fingerprint for upload. Returns false if it is already being
  /// uploaded by another task.
  pub fn try_begin(&self, key: &str, path: PathBuf) -> bool {
    match self.in_flight.entry(key.to_string()) {
      dashmap::mapref::entry::Entry::Occupied(_) => false,
      dashmap::mapref::entry::Entry::Vacant(slot) => {
        slot.insert(path);
        true
      }
    }
  }

  pub fn finish_flight(&self, key: &str) {
    self.in_flight.remove(key);
  }

  /// Whether any in-flight upload is reading from `path`. The reclaimer
  /// refuses to delete such files.
  pub fn path_in_flight(&self, path: &Path) -> bool {
    self.in_flight.iter().any(|entry| entry.value() == path)
  }
}
