//! Handles for sending messages into the daemon tasks.
//!
//! Handles are cheap to clone; they wrap the channel sender so callers
//! never hold the receiving task's internals.

use tokio::sync::mpsc;

use super::message::{ReadyFile, ReclaimEvent};

/// Errors sending into a task
#[derive(Debug, thiserror::Error)]
pub enum SendError {
  #[error("Task has shut down")]
  TaskGone,
}

// ============================================================================
// Uploader Handle
// ============================================================================

/// Handle for feeding ready files to the uploader
#[derive(Clone, Debug)]
pub struct UploaderHandle {
  pub tx: mpsc::Sender<ReadyFile>,
}

impl UploaderHandle {
  pub fn new(tx: mpsc::Sender<ReadyFile>) -> Self {
    Self { tx }
  }

  pub async fn send(&self, file: ReadyFile) -> Result<(), SendError> {
    self.tx.send(file).await.map_err(|_| SendError::TaskGone)
  }
}

// ============================================================================
// Reclaimer Handle
// ============================================================================

/// Handle for notifying the reclaimer of upload completions
#[derive(Clone, Debug)]
pub struct ReclaimerHandle {
  pub tx: mpsc::Sender<ReclaimEvent>,
}

impl ReclaimerHandle {
  pub fn new(tx: mpsc::Sender<ReclaimEvent>) -> Self {
    Self { tx }
  }

  pub async fn send(&self, event: ReclaimEvent) -> Result<(), SendError> {
    self.tx.send(event).await.map_err(|_| SendError::TaskGone)
  }
}
