//! Crash-durable upload queue.
//!
//! Entries stay queued until an upload completes or the file is given up
//! on, so a crash mid-upload loses nothing: the entry is still there at
//! restart. Double-dispatch within one process is prevented by the
//! in-flight set, not by removing entries early.

use super::StateError;
use chrono::{DateTime, Utc};
use logship_core::Fingerprint;
use logship_core::config::UploadConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const QUEUE_VERSION: u32 = 1;

/// A file waiting to be uploaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFile {
  pub fingerprint: Fingerprint,
  pub first_seen_at: DateTime<Utc>,
  pub attempts: u32,
  pub last_attempt_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Retry policy
// ============================================================================

/// Exponential backoff with a ceiling and an attempt cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  base: Duration,
  cap: Duration,
  max_attempts: u32,
}

impl RetryPolicy {
  pub fn from_config(config: &UploadConfig) -> Self {
    Self {
      base: Duration::from_secs(config.retry_base_secs),
      cap: Duration::from_secs(config.retry_cap_secs),
      max_attempts: config.max_attempts.max(1),
    }
  }

  /// Delay before the next try after `attempts` failures:
  /// min(cap, base * 2^attempts).
  pub fn backoff_for_attempt(&self, attempts: u32) -> Duration {
    let exp = self.base.as_secs_f64() * 2f64.powi(attempts.min(32) as i32);
    Duration::from_secs_f64(exp.min(self.cap.as_secs_f64()))
  }

  /// Whether a file with this many failed attempts should be given up on.
  pub fn exhausted(&self, attempts: u32) -> bool {
    attempts >= self.max_attempts
  }

  /// Whether the entry's backoff has elapsed at `now`. After n failures
  /// the entry waits backoff_for_attempt(n - 1), so the first retry comes
  /// after the base delay.
  pub fn is_eligible(&self, entry: &PendingFile, now: DateTime<Utc>) -> bool {
    match entry.last_attempt_at {
      None => true,
      Some(last) => {
        let delay = self.backoff_for_attempt(entry.attempts.saturating_sub(1));
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(last) >= delay
      }
    }
  }
}

// ============================================================================
// Queue
// ============================================================================

/// The persistent upload queue
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestQueue {
  version: u32,
  entries: Vec<PendingFile>,
}

impl Default for IngestQueue {
  fn default() -> Self {
    Self {
      version: QUEUE_VERSION,
      entries: Vec::new(),
    }
  }
}

impl IngestQueue {
  /// Load the queue, falling back to the backup copy and then to empty.
  /// A corrupt or future-versioned file must never stop the daemon.
  pub fn load(path: &Path) -> Self {
    match super::load_json_with_fallback::<Self>(path) {
      Some(queue) if queue.version == QUEUE_VERSION => queue,
      Some(queue) => {
        warn!(
          path = %path.display(),
          version = queue.version,
          "Unknown queue version, starting empty"
        );
        Self::default()
      }
      None => Self::default(),
    }
  }

  pub fn persist(&self, path: &Path) -> Result<(), StateError> {
    let bytes = serde_json::to_vec_pretty(self)?;
    super::write_atomic(path, &bytes)
  }

  /// Add a file if its fingerprint is not already queued.
  pub fn enqueue(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) -> bool {
    if self.entries.iter().any(|e| e.fingerprint == fingerprint) {
      return false;
    }
    self.entries.push(PendingFile {
      fingerprint,
      first_seen_at: now,
      attempts: 0,
      last_attempt_at: None,
    });
    true
  }

  pub fn entry(&self, key: &str) -> Option<&PendingFile> {
    self.entries.iter().find(|e| e.fingerprint.key() == key)
  }

  /// Record a failed attempt and return the new attempt count.
  pub fn mark_attempt(&mut self, key: &str, at: DateTime<Utc>) -> Option<u32> {
    let entry = self.entries.iter_mut().find(|e| e.fingerprint.key() == key)?;
    entry.attempts += 1;
    entry.last_attempt_at = Some(at);
    Some(entry.attempts)
  }

  pub fn remove(&mut self, key: &str) -> bool {
    let before = self.entries.len();
    self.entries.retain(|e| e.fingerprint.key() != key);
    self.entries.len() < before
  }

  /// Drop entries whose fingerprint no longer matches the disk and return
  /// them. A modified file counts as vanished; the watcher re-detects the
  /// new content as a new fingerprint.
  pub fn reconcile(&mut self) -> Vec<Fingerprint> {
    let mut vanished = Vec::new();
    self.entries.retain(|e| {
      if e.fingerprint.matches_disk() {
        true
      } else {
        vanished.push(e.fingerprint.clone());
        false
      }
    });
    vanished
  }

  /// Reconcile, then clone up to `limit` entries whose backoff has elapsed.
  /// Returned entries stay queued until completion.
  pub fn ready_batch(
    &mut self,
    limit: usize,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
  ) -> (Vec<PendingFile>, Vec<Fingerprint>) {
    let vanished = self.reconcile();
    let ready = self
      .entries
      .iter()
      .filter(|e| policy.is_eligible(e, now))
      .take(limit)
      .cloned()
      .collect();
    (ready, vanished)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PendingFile> {
    self.entries.iter()
  }
}
