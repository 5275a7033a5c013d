//! Upload counters, flushed into the log after each batch.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Sink for upload outcome counters.
pub trait MetricsSink: Send + Sync {
  fn record_success(&self, bytes: u64);
  fn record_failure(&self);
  fn flush(&self);
}

/// Counters accumulated since the last flush and emitted as a log line.
#[derive(Debug, Default)]
pub struct LogMetrics {
  uploads: AtomicU64,
  bytes: AtomicU64,
  failures: AtomicU64,
}

impl LogMetrics {
  pub fn new() -> Self {
    Self::default()
  }
}

impl MetricsSink for LogMetrics {
  fn record_success(&self, bytes: u64) {
    self.uploads.fetch_add(1, Ordering::Relaxed);
    self.bytes.fetch_add(bytes, Ordering::Relaxed);
  }

  fn record_failure(&self) {
    self.failures.fetch_add(1, Ordering::Relaxed);
  }

  fn flush(&self) {
    let uploads = self.uploads.swap(0, Ordering::Relaxed);
    let bytes = self.bytes.swap(0, Ordering::Relaxed);
    let failures = self.failures.swap(0, Ordering::Relaxed);
    if uploads == 0 && bytes == 0 && failures == 0 {
      return;
    }
    info!(uploads, bytes, failures, "Upload totals since last flush");
  }
}
