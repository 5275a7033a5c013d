//! Messages flowing between the daemon tasks.

use chrono::{DateTime, Utc};
use logship_core::Fingerprint;

/// A settled file the watcher hands to the uploader.
///
/// Only the fingerprint travels; the owning source is resolved from config
/// at upload time so queue entries restored after a restart behave the
/// same as fresh ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyFile {
  pub fingerprint: Fingerprint,
}

/// Events the uploader sends the reclaimer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReclaimEvent {
  /// A file finished uploading (or was found already remote)
  Uploaded {
    fingerprint: Fingerprint,
    uploaded_at: DateTime<Utc>,
  },
}
