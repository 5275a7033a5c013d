//! Directory-tree store backend, typically pointed at a mounted share.
//!
//! Uploads land as `root/label/YYYY-MM-DD/filename`. The copy goes to a
//! `.part` name first and is renamed into place, so readers of the share
//! never observe a half-written blob under its final key.

use super::{BlobStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub struct DirStore {
  root: PathBuf,
}

impl DirStore {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Map a key to a path under the root, refusing anything that could
  /// escape it.
  fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
    let rel = Path::new(key);
    if rel.is_absolute() {
      return Err(StoreError::InvalidDestination {
        key: key.to_string(),
        reason: "key must be relative".to_string(),
      });
    }
    for component in rel.components() {
      if !matches!(component, Component::Normal(_)) {
        return Err(StoreError::InvalidDestination {
          key: key.to_string(),
          reason: "key must not traverse".to_string(),
        });
      }
    }
    Ok(self.root.join(rel))
  }
}

#[async_trait]
impl BlobStore for DirStore {
  async fn put(&self, key: &str, src: &Path) -> Result<(), StoreError> {
    match tokio::fs::metadata(src).await {
      Ok(_) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => {
        return Err(StoreError::SourceVanished(src.to_path_buf()));
      }
      Err(e) => {
        return Err(StoreError::LocalRead {
          path: src.to_path_buf(),
          source: e,
        });
      }
    }

    // A missing root usually means the share is not mounted right now.
    if !matches!(tokio::fs::try_exists(&self.root).await, Ok(true)) {
      return Err(StoreError::Unavailable(format!(
        "store root {} is not reachable",
        self.root.display()
      )));
    }

    let dst = self.resolve(key)?;
    if let Some(parent) = dst.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(StoreError::Io)?;
    }

    let part = match dst.file_name().and_then(|n| n.to_str()) {
      Some(name) => dst.with_file_name(format!("{name}.part")),
      None => {
        return Err(StoreError::InvalidDestination {
          key: key.to_string(),
          reason: "key has no file name".to_string(),
        });
      }
    };

    tokio::fs::copy(src, &part).await.map_err(StoreError::Io)?;
    tokio::fs::rename(&part, &dst).await.map_err(StoreError::Io)?;
    Ok(())
  }

  async fn list(&self, prefix: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<String>, StoreError> {
    let base = self.resolve(prefix)?;
    let mut days = match tokio::fs::read_dir(&base).await {
      Ok(read) => read,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(StoreError::Io(e)),
    };

    let mut keys = Vec::new();
    while let Some(entry) = days.next_entry().await.map_err(StoreError::Io)? {
      let dir_name = entry.file_name();
      let Some(day_str) = dir_name.to_str() else { continue };
      let Ok(day) = NaiveDate::parse_from_str(day_str, "%Y-%m-%d") else {
        continue;
      };
      if day < from || day > to {
        continue;
      }

      let mut files = match tokio::fs::read_dir(entry.path()).await {
        Ok(read) => read,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => return Err(StoreError::Io(e)),
      };
      while let Some(file) = files.next_entry().await.map_err(StoreError::Io)? {
        let file_name = file.file_name();
        let Some(name) = file_name.to_str() else { continue };
        // Incomplete blobs from an interrupted copy are not uploads.
        if name.ends_with(".part") {
          continue;
        }
        keys.push(format!("{prefix}/{day_str}/{name}"));
      }
    }
    Ok(keys)
  }
}
