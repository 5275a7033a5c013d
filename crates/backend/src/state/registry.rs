//! Cross-restart record of completed uploads, keyed by fingerprint.
//!
//! A registry hit means this exact (path, size, mtime) was already shipped,
//! so it is skipped without touching the remote. Entries outlive local
//! deletion of the file and age out after the configured retention.

use super::StateError;
use chrono::{DateTime, Utc};
use logship_core::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const REGISTRY_VERSION: u32 = 1;

/// One completed upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
  pub fingerprint: Fingerprint,
  pub uploaded_at: DateTime<Utc>,
}

/// The persistent upload registry
#[derive(Debug, Serialize, Deserialize)]
pub struct DedupRegistry {
  version: u32,
  entries: HashMap<String, RegistryEntry>,
}

impl Default for DedupRegistry {
  fn default() -> Self {
    Self {
      version: REGISTRY_VERSION,
      entries: HashMap::new(),
    }
  }
}

impl DedupRegistry {
  /// Load the registry, falling back to the backup copy and then to empty.
  pub fn load(path: &Path) -> Self {
    match super::load_json_with_fallback::<Self>(path) {
      Some(registry) if registry.version == REGISTRY_VERSION => registry,
      Some(registry) => {
        warn!(
          path = %path.display(),
          version = registry.version,
          "Unknown registry version, starting empty"
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

  pub fn record(&mut self, fingerprint: Fingerprint, uploaded_at: DateTime<Utc>) {
    let key = fingerprint.key();
    self.entries.insert(
      key,
      RegistryEntry {
        fingerprint,
        uploaded_at,
      },
    );
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
    self.entries.get(key)
  }

  pub fn forget(&mut self, key: &str) -> bool {
    self.entries.remove(key).is_some()
  }

  /// Drop entries uploaded at least `retention_days` ago; returns how many.
  pub fn sweep(&mut self, now: DateTime<Utc>, retention_days: i64) -> usize {
    let cutoff = now - chrono::Duration::days(retention_days);
    let before = self.entries.len();
    self.entries.retain(|_, e| e.uploaded_at > cutoff);
    before - self.entries.len()
  }

  pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
