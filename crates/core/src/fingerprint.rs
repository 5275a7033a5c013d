//! File identity for dedup and change detection.
//!
//! A fingerprint is (path, size, mtime). Two fingerprints with the same key
//! are the same logical file content at the same location; a rotated or
//! appended file produces a new fingerprint and is handled as a new file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Identity of a file at a moment in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub path: PathBuf,
  pub size: u64,
  pub modified: DateTime<Utc>,
}

impl Fingerprint {
  /// Fingerprint a file as it currently exists on disk.
  pub fn of_path(path: &Path) -> std::io::Result<Self> {
    let meta = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = meta.modified()?.into();
    Ok(Self {
      path: path.to_path_buf(),
      size: meta.len(),
      // Millisecond precision so equality, keys, and serialized round-trips
      // all agree regardless of filesystem timestamp granularity.
      modified: DateTime::from_timestamp_millis(modified.timestamp_millis()).unwrap_or(modified),
    })
  }

  /// Stable dedup key: sha256 over path, size, and mtime.
  pub fn key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.path.as_os_str().as_encoded_bytes());
    hasher.update(b"|");
    hasher.update(self.size.to_le_bytes());
    hasher.update(b"|");
    hasher.update(self.modified.timestamp_millis().to_le_bytes());
    hex::encode(hasher.finalize())
  }

  /// First 16 hex chars of the key, used as a remote filename suffix.
  pub fn short_key(&self) -> String {
    let mut key = self.key();
    key.truncate(16);
    key
  }

  /// Whether the file on disk still matches this fingerprint exactly.
  /// A vanished or re-stat-failing file does not match.
  pub fn matches_disk(&self) -> bool {
    Self::of_path(&self.path).map(|now| now == *self).unwrap_or(false)
  }
}
