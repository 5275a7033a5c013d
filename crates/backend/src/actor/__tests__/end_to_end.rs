//! Whole-pipeline test: mixed outcomes across several drains, then
//! reclamation of what shipped.

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;

  use crate::{
    actor::{
      __tests__::helpers::{CountingMetrics, MockStore, ShipperTestContext, drain},
      reclaimer,
    },
    metrics::MetricsSink,
    remote::BlobStore,
  };

  /// Test: three files with different fates — a clean upload, transient
  /// failures that recover, and a permanent rejection — then the
  /// after-upload policy cleans up exactly what shipped.
  #[tokio::test]
  async fn test_mixed_batch_lifecycle() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.after_upload_enabled = true;
    config.disk.keep_days = 0;
    let config = Arc::new(config);
    let state = ctx.open_state();

    let mock = MockStore::new();
    mock.fail_transient("flaky.log", 2);
    mock.fail_permanent("broken.log");
    let store: Arc<dyn BlobStore> = mock.clone();
    let metrics = CountingMetrics::new();
    let sink: Arc<dyn MetricsSink> = metrics.clone();

    let clean = ctx.write_log("clean.log", "clean\n");
    let flaky = ctx.write_log("flaky.log", "flaky\n");
    let broken = ctx.write_log("broken.log", "broken\n");
    let clean_fp = ctx.fingerprint(&clean);
    let flaky_fp = ctx.fingerprint(&flaky);
    let broken_fp = ctx.fingerprint(&broken);
    for fp in [&clean_fp, &flaky_fp, &broken_fp] {
      state.enqueue(fp.clone(), Utc::now()).await.expect("enqueue");
    }

    // Drain 1: clean ships, flaky fails once, broken is rejected
    let first = drain(&config, &state, &store, &sink).await;
    assert_eq!(first.uploaded.len(), 1);
    assert_eq!(first.retrying, 1);
    assert_eq!(first.failures, 1);
    assert_eq!(state.queue_len().await, 1);

    // Drain 2: flaky fails again
    let second = drain(&config, &state, &store, &sink).await;
    assert_eq!(second.retrying, 1);

    // Drain 3: flaky recovers
    let third = drain(&config, &state, &store, &sink).await;
    assert_eq!(third.uploaded.len(), 1);
    assert_eq!(state.queue_len().await, 0, "Queue should be empty once every file resolved");

    assert!(state.is_uploaded(&clean_fp.key()).await);
    assert!(state.is_uploaded(&flaky_fp.key()).await);
    assert!(
      !state.is_uploaded(&broken_fp.key()).await,
      "Rejected file must not enter the registry"
    );

    // clean: 1 put, flaky: 3, broken: 1
    assert_eq!(mock.put_count(), 5);
    let keys = mock.stored_keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().any(|k| k.contains("/clean.log.")));
    assert!(keys.iter().any(|k| k.contains("/flaky.log.")));

    assert_eq!(metrics.uploads(), 2);
    assert_eq!(metrics.failures(), 1);
    assert_eq!(metrics.bytes(), ("clean\n".len() + "flaky\n".len()) as u64);

    // keep_days = 0: shipped files can go at once; the rejected file
    // stays on disk for the operator to inspect
    let deleted = reclaimer::after_upload_sweep(&config, &state).await;
    assert_eq!(deleted, 2);
    assert!(!clean.exists());
    assert!(!flaky.exists());
    assert!(broken.exists());

    // The registry survives local deletion; retention is what forgets
    assert!(state.is_uploaded(&clean_fp.key()).await);
    let swept = state
      .sweep_registry(Utc::now(), config.registry.retention_days)
      .await
      .expect("sweep registry");
    assert_eq!(swept, 0, "Fresh uploads live on in the registry");
  }

  /// Test: queue and registry survive a state store reopen mid-stream.
  #[tokio::test]
  async fn test_restart_resumes_pending_work() {
    let ctx = ShipperTestContext::new();
    let config = Arc::new(ctx.config.clone());

    let done = ctx.write_log("done.log", "done\n");
    let waiting = ctx.write_log("waiting.log", "waiting\n");
    let done_fp = ctx.fingerprint(&done);
    let waiting_fp = ctx.fingerprint(&waiting);

    {
      let state = ctx.open_state();
      let mock = MockStore::new();
      mock.fail_transient("waiting.log", 100);
      let store: Arc<dyn BlobStore> = mock.clone();
      let metrics = CountingMetrics::new();
      let sink: Arc<dyn MetricsSink> = metrics.clone();

      state.enqueue(done_fp.clone(), Utc::now()).await.expect("enqueue done");
      state
        .enqueue(waiting_fp.clone(), Utc::now())
        .await
        .expect("enqueue waiting");
      drain(&config, &state, &store, &sink).await;
    }

    // Fresh process: the registry remembers, the queue resumes
    let state = ctx.open_state();
    assert!(state.is_uploaded(&done_fp.key()).await, "Registry survives the restart");
    assert_eq!(state.queue_len().await, 1, "Unfinished work survives the restart");
    let entry = state
      .pending_entry(&waiting_fp.key())
      .await
      .expect("waiting entry restored");
    assert_eq!(entry.attempts, 1, "Attempt counts survive the restart");

    let mock = MockStore::new();
    let store: Arc<dyn BlobStore> = mock.clone();
    let metrics = CountingMetrics::new();
    let sink: Arc<dyn MetricsSink> = metrics.clone();
    let outcome = drain(&config, &state, &store, &sink).await;
    assert_eq!(outcome.uploaded.len(), 1);
    assert!(state.is_uploaded(&waiting_fp.key()).await);
    assert_eq!(state.queue_len().await, 0);
  }
}
