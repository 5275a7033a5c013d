//! Remote blob store abstraction.
//!
//! The uploader only speaks [`BlobStore`]; backends decide how keys map to
//! storage. Error classification drives retry behavior: transient errors
//! back off and retry, everything else drops the file from the queue.

mod dir;

pub use dir::DirStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use logship_core::config::{RemoteBackend, RemoteConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors from a remote store operation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Store unavailable: {0}")]
  Unavailable(String),

  #[error("Store throttled the request: {0}")]
  Throttled(String),

  #[error("Store rejected credentials: {0}")]
  Credentials(String),

  #[error("Invalid destination key {key}: {reason}")]
  InvalidDestination { key: String, reason: String },

  #[error("Failed to read local file {path}: {source}")]
  LocalRead {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Local file vanished before upload: {0}")]
  SourceVanished(PathBuf),

  #[error("Store I/O error: {0}")]
  Io(std::io::Error),
}

impl StoreError {
  /// Whether retrying later could succeed. Unreachable stores, throttling,
  /// credential problems, and I/O hiccups are worth retrying; malformed
  /// keys and unreadable sources are not.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::Unavailable(_) | Self::Throttled(_) | Self::Credentials(_) | Self::Io(_)
    )
  }
}

/// A destination for uploaded log files.
///
/// Keys are slash-separated relative paths of the form
/// `label/YYYY-MM-DD/filename`.
#[async_trait]
pub trait BlobStore: Send + Sync {
  /// Upload the local file at `src` to `key`. Visible either completely
  /// or not at all; partial blobs must never appear under the final key.
  async fn put(&self, key: &str, src: &Path) -> Result<(), StoreError>;

  /// List keys under `prefix` whose day falls within `from..=to`.
  async fn list(&self, prefix: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<String>, StoreError>;
}

impl dyn BlobStore {
  /// Construct the configured store backend.
  pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn BlobStore>, StoreError> {
    match config.backend {
      RemoteBackend::Dir => Ok(Arc::new(DirStore::new(config.root.clone()))),
    }
  }
}
