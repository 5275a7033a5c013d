//! Upload orchestrator.
//!
//! Owns the queue end to end: ready files from the watcher are enqueued
//! and usually dispatched right away, scheduled runs and retry sweeps
//! drain whatever is eligible, and every entry goes through the same
//! pipeline — vanish check, registry check, remote duplicate check, then
//! the actual put with error-classified retry.
//!
//! Entries leave the queue only on completion: uploaded, confirmed
//! duplicate, vanished, given up on, or permanently rejected. A crash at
//! any point leaves the entry queued for the next run.

use chrono::{DateTime, Local, Utc};
use logship_core::{Config, Fingerprint};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::ReclaimerHandle;
use super::message::{ReadyFile, ReclaimEvent};
use crate::metrics::MetricsSink;
use crate::remote::{BlobStore, StoreError};
use crate::schedule::{self, HoursWindow, RunMode};
use crate::state::{PendingFile, RetryPolicy, StateStore};

// ============================================================================
// Entry pipeline
// ============================================================================

/// How one queue entry ended up after a pass through the pipeline
#[derive(Debug)]
pub(crate) enum EntryOutcome {
  Uploaded(DateTime<Utc>),
  /// Found in the registry or on the remote; recorded without uploading
  AlreadyRemote(DateTime<Utc>),
  /// Transient failure, still queued with backoff
  Transient,
  /// Gave up after max_attempts transient failures
  Exhausted,
  /// Permanently rejected; purged from queue and registry
  Permanent,
  /// File vanished or changed on disk; purged
  Vanished,
}

/// Aggregate outcome of a batch
#[derive(Debug, Default)]
pub(crate) struct DrainOutcome {
  pub uploaded: Vec<(Fingerprint, DateTime<Utc>)>,
  pub retrying: usize,
  pub failures: usize,
  pub vanished: usize,
}

fn remote_key(label: &str, fingerprint: &Fingerprint) -> String {
  let name = fingerprint.path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
  format!(
    "{}/{}/{}.{}",
    label,
    fingerprint.modified.format("%Y-%m-%d"),
    name,
    fingerprint.short_key()
  )
}

/// Whether a blob with this fingerprint's short key already exists on the
/// remote within ± duplicate_window_days of the file's mtime date.
async fn check_remote_duplicate(
  store: &dyn BlobStore,
  config: &Config,
  label: &str,
  fingerprint: &Fingerprint,
) -> Result<bool, StoreError> {
  let window = chrono::Duration::days(config.upload.duplicate_window_days);
  let date = fingerprint.modified.date_naive();
  let keys = store.list(label, date - window, date + window).await?;
  let suffix = format!(".{}", fingerprint.short_key());
  Ok(keys.iter().any(|k| k.ends_with(&suffix)))
}

async fn note_transient(
  state: &StateStore,
  metrics: &dyn MetricsSink,
  policy: &RetryPolicy,
  key: &str,
  path: &Path,
  error: &StoreError,
) -> EntryOutcome {
  let attempts = match state.mark_attempt(key, Utc::now()).await {
    Ok(attempts) => attempts,
    Err(e) => {
      warn!(error = %e, "Failed to persist attempt count");
      // The in-memory count still advanced
      state.pending_entry(key).await.map(|p| p.attempts).unwrap_or(1)
    }
  };

  if policy.exhausted(attempts) {
    warn!(
      path = %path.display(),
      attempts,
      error = %error,
      "Giving up on file after repeated failures"
    );
    if let Err(e) = state.remove_pending(key).await {
      warn!(error = %e, "Failed to drop exhausted file from queue");
    }
    metrics.record_failure();
    EntryOutcome::Exhausted
  } else {
    let retry_in = policy.backoff_for_attempt(attempts.saturating_sub(1));
    warn!(
      path = %path.display(),
      attempts,
      retry_in_secs = retry_in.as_secs(),
      error = %error,
      "Upload failed, will retry"
    );
    EntryOutcome::Transient
  }
}

async fn drop_permanent(
  state: &StateStore,
  metrics: &dyn MetricsSink,
  key: &str,
  path: &Path,
  error: &StoreError,
) -> EntryOutcome {
  error!(path = %path.display(), error = %error, "Upload failed permanently, dropping file");
  if let Err(e) = state.purge(key).await {
    warn!(error = %e, "Failed to purge rejected file from state");
  }
  metrics.record_failure();
  EntryOutcome::Permanent
}

/// Run one queue entry through the whole pipeline.
pub(crate) async fn process_entry(
  config: &Config,
  state: &StateStore,
  store: &dyn BlobStore,
  metrics: &dyn MetricsSink,
  entry: &PendingFile,
) -> EntryOutcome {
  let fingerprint = &entry.fingerprint;
  let path = fingerprint.path.as_path();
  let key = fingerprint.key();
  let policy = RetryPolicy::from_config(&config.upload);

  // The disk is the truth. A changed file comes back through the watcher
  // as a new fingerprint if it still exists.
  if !fingerprint.matches_disk() {
    info!(path = %path.display(), "File vanished or changed, dropping from queue");
    if let Err(e) = state.purge(&key).await {
      warn!(error = %e, "Failed to drop vanished file from state");
    }
    return EntryOutcome::Vanished;
  }

  if let Some(at) = state.uploaded_at(&key).await {
    debug!(path = %path.display(), "Already in upload registry, skipping");
    if let Err(e) = state.remove_pending(&key).await {
      warn!(error = %e, "Failed to drop recorded file from queue");
    }
    return EntryOutcome::AlreadyRemote(at);
  }

  let Some(source) = config.source_for(path) else {
    warn!(path = %path.display(), "No source claims queued file, dropping");
    if let Err(e) = state.remove_pending(&key).await {
      warn!(error = %e, "Failed to drop unclaimed file from queue");
    }
    metrics.record_failure();
    return EntryOutcome::Permanent;
  };

  match check_remote_duplicate(store, config, &source.label, fingerprint).await {
    Ok(true) => {
      info!(path = %path.display(), "Already on remote, recording without upload");
      let at = Utc::now();
      if let Err(e) = state.record_uploaded(fingerprint.clone(), at).await {
        warn!(error = %e, "Failed to record remote duplicate");
      }
      return EntryOutcome::AlreadyRemote(at);
    }
    Ok(false) => {}
    Err(e) if e.is_transient() => {
      return note_transient(state, metrics, &policy, &key, path, &e).await;
    }
    Err(e) => return drop_permanent(state, metrics, &key, path, &e).await,
  }

  let destination = remote_key(&source.label, fingerprint);
  match store.put(&destination, path).await {
    Ok(()) => {
      let at = Utc::now();
      if let Err(e) = state.record_uploaded(fingerprint.clone(), at).await {
        // The blob is on the remote; the duplicate check recognizes it
        // even if this record is lost.
        warn!(path = %path.display(), error = %e, "Uploaded but failed to record");
      }
      metrics.record_success(fingerprint.size);
      info!(
        path = %path.display(),
        key = %destination,
        attempts = entry.attempts,
        "Uploaded file"
      );
      EntryOutcome::Uploaded(at)
    }
    Err(StoreError::SourceVanished(_)) => {
      info!(path = %path.display(), "File vanished during upload, dropping from queue");
      if let Err(e) = state.purge(&key).await {
        warn!(error = %e, "Failed to drop vanished file from state");
      }
      EntryOutcome::Vanished
    }
    Err(e) if e.is_transient() => note_transient(state, metrics, &policy, &key, path, &e).await,
    Err(e) => drop_permanent(state, metrics, &key, path, &e).await,
  }
}

fn tally(outcome: &mut DrainOutcome, fingerprint: Fingerprint, result: EntryOutcome) {
  match result {
    EntryOutcome::Uploaded(at) | EntryOutcome::AlreadyRemote(at) => outcome.uploaded.push((fingerprint, at)),
    EntryOutcome::Transient => outcome.retrying += 1,
    EntryOutcome::Exhausted | EntryOutcome::Permanent => outcome.failures += 1,
    EntryOutcome::Vanished => outcome.vanished += 1,
  }
}

/// Process entries with bounded parallelism, claiming each in the
/// in-flight set first so the same fingerprint is never uploaded twice
/// concurrently.
pub(crate) async fn process_entries(
  config: &Arc<Config>,
  state: &Arc<StateStore>,
  store: &Arc<dyn BlobStore>,
  metrics: &Arc<dyn MetricsSink>,
  cancel: &CancellationToken,
  entries: Vec<PendingFile>,
) -> DrainOutcome {
  let parallel = config.upload.parallel_uploads.max(1);
  let mut outcome = DrainOutcome::default();
  let mut tasks: JoinSet<(Fingerprint, EntryOutcome)> = JoinSet::new();

  for entry in entries {
    if cancel.is_cancelled() {
      break;
    }
    while tasks.len() >= parallel {
      match tasks.join_next().await {
        Some(Ok((fingerprint, result))) => tally(&mut outcome, fingerprint, result),
        Some(Err(e)) => warn!(error = %e, "Upload task failed"),
        None => break,
      }
    }

    let key = entry.fingerprint.key();
    if !state.try_begin(&key, entry.fingerprint.path.clone()) {
      debug!(path = %entry.fingerprint.path.display(), "Upload already in flight, skipping");
      continue;
    }

    let config = config.clone();
    let state = state.clone();
    let store = store.clone();
    let metrics = metrics.clone();
    tasks.spawn(async move {
      let result = process_entry(&config, &state, store.as_ref(), metrics.as_ref(), &entry).await;
      state.finish_flight(&key);
      (entry.fingerprint, result)
    });
  }

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Ok((fingerprint, result)) => tally(&mut outcome, fingerprint, result),
      Err(e) => warn!(error = %e, "Upload task failed"),
    }
  }

  outcome
}

/// Pull everything eligible from the queue and process it.
pub(crate) async fn drain_queue(
  config: &Arc<Config>,
  state: &Arc<StateStore>,
  store: &Arc<dyn BlobStore>,
  metrics: &Arc<dyn MetricsSink>,
  cancel: &CancellationToken,
) -> DrainOutcome {
  let policy = RetryPolicy::from_config(&config.upload);
  let batch = match state.next_batch(usize::MAX, Utc::now(), &policy).await {
    Ok(batch) => batch,
    Err(e) => {
      warn!(error = %e, "Failed to read upload queue");
      return DrainOutcome::default();
    }
  };

  let mut outcome = process_entries(config, state, store, metrics, cancel, batch.entries).await;
  outcome.vanished += batch.dropped;

  let total = outcome.uploaded.len() + outcome.retrying + outcome.failures + outcome.vanished;
  if total > 0 {
    info!(
      uploaded = outcome.uploaded.len(),
      retrying = outcome.retrying,
      failed = outcome.failures,
      dropped = outcome.vanished,
      "Queue drain finished"
    );
  }
  outcome
}

// ============================================================================
// Task
// ============================================================================

/// Long-lived upload orchestrator.
pub struct UploaderTask {
  config: watch::Receiver<Arc<Config>>,
  state: Arc<StateStore>,
  store: Arc<dyn BlobStore>,
  metrics: Arc<dyn MetricsSink>,
  reclaimer: ReclaimerHandle,
  cancel: CancellationToken,
  ready_rx: mpsc::Receiver<ReadyFile>,
}

impl UploaderTask {
  pub fn new(
    config: watch::Receiver<Arc<Config>>,
    state: Arc<StateStore>,
    store: Arc<dyn BlobStore>,
    metrics: Arc<dyn MetricsSink>,
    reclaimer: ReclaimerHandle,
    cancel: CancellationToken,
    ready_rx: mpsc::Receiver<ReadyFile>,
  ) -> Self {
    Self {
      config,
      state,
      store,
      metrics,
      reclaimer,
      cancel,
      ready_rx,
    }
  }

  pub async fn run(mut self) {
    // Ship whatever survived the last run, hours or not. Per-entry
    // backoff still applies.
    self.drain().await;
    let mut last_scheduled = Local::now().naive_local();

    let poll_secs = self.config.borrow().upload.poll_secs.max(1);
    let mut tick = tokio::time::interval(Duration::from_secs(poll_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!("Uploader shutting down");
          break;
        }

        Some(ready) = self.ready_rx.recv() => {
          self.on_ready(ready).await;
        }

        _ = tick.tick() => {
          let config = self.config.borrow().clone();
          let now = Local::now().naive_local();
          let mode = RunMode::from_config(&config.schedule);

          if schedule::run_due(now, last_scheduled, &mode) {
            last_scheduled = now;
            debug!("Scheduled run starting");
            self.drain().await;
          } else if schedule::dispatch_allowed(now.time(), HoursWindow::from_config(&config.schedule).as_ref()) {
            // Retry sweep: picks up entries whose backoff just elapsed.
            // No-ops when nothing is eligible.
            self.drain().await;
          }
        }
      }
    }
  }

  async fn on_ready(&self, ready: ReadyFile) {
    let config = self.config.borrow().clone();
    let key = ready.fingerprint.key();

    if self.state.is_uploaded(&key).await {
      debug!(path = %ready.fingerprint.path.display(), "Already uploaded, skipping");
      return;
    }

    if let Err(e) = self.state.enqueue(ready.fingerprint.clone(), Utc::now()).await {
      // The entry is still queued in memory; only durability degraded.
      warn!(error = %e, "Failed to persist queue entry, continuing");
    }

    let now = Local::now().naive_local();
    let window = HoursWindow::from_config(&config.schedule);
    if !schedule::dispatch_allowed(now.time(), window.as_ref()) {
      debug!(path = %ready.fingerprint.path.display(), "Outside operational hours, queued for later");
      return;
    }

    if config.upload.upload_all_on_ready {
      self.drain().await;
      return;
    }

    // Dispatch just this file, honoring any backoff it accumulated
    let policy = RetryPolicy::from_config(&config.upload);
    let Some(entry) = self.state.pending_entry(&key).await else {
      return;
    };
    if !policy.is_eligible(&entry, Utc::now()) {
      debug!(path = %entry.fingerprint.path.display(), "Backoff pending, queued for later");
      return;
    }

    let outcome = process_entries(
      &config,
      &self.state,
      &self.store,
      &self.metrics,
      &self.cancel,
      vec![entry],
    )
    .await;
    self.announce(outcome).await;
  }

  async fn drain(&self) {
    let config = self.config.borrow().clone();
    let outcome = drain_queue(&config, &self.state, &self.store, &self.metrics, &self.cancel).await;
    self.announce(outcome).await;
    self.metrics.flush();
  }

  /// Tell the reclaimer about completed uploads.
  async fn announce(&self, outcome: DrainOutcome) {
    for (fingerprint, uploaded_at) in outcome.uploaded {
      if self
        .reclaimer
        .send(ReclaimEvent::Uploaded {
          fingerprint,
          uploaded_at,
        })
        .await
        .is_err()
      {
        debug!("Reclaimer is gone, dropping upload notification");
      }
    }
  }
}
