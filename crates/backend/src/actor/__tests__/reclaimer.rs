//! Reclamation tests: deletion gates and the three disk policies.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use chrono::Utc;
  use tokio::sync::{mpsc, watch};
  use tokio_util::sync::CancellationToken;

  use crate::actor::{
    ReclaimerTask,
    __tests__::helpers::{FakeProbe, ShipperTestContext, wait_for},
    message::ReclaimEvent,
    reclaimer,
  };

  /// Test: the after-upload policy deletes only uploads older than keep_days.
  #[tokio::test]
  async fn test_after_upload_sweep_respects_keep_days() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.after_upload_enabled = true;
    config.disk.keep_days = 7;
    let state = ctx.open_state();

    let old = ctx.write_log("old.log", "old upload\n");
    let recent = ctx.write_log("recent.log", "recent upload\n");
    let old_fp = ctx.fingerprint(&old);
    let recent_fp = ctx.fingerprint(&recent);

    state
      .record_uploaded(old_fp, Utc::now() - chrono::Duration::days(8))
      .await
      .expect("record old upload");
    state
      .record_uploaded(recent_fp, Utc::now() - chrono::Duration::days(1))
      .await
      .expect("record recent upload");

    let deleted = reclaimer::after_upload_sweep(&config, &state).await;
    assert_eq!(deleted, 1);
    assert!(!old.exists(), "Upload past keep_days should be deleted");
    assert!(recent.exists(), "Recent upload should be kept");
  }

  /// Test: without allow_deletion no policy may delete.
  #[tokio::test]
  async fn test_deletion_requires_allow_flag() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.disk.after_upload_enabled = true;
    config.disk.keep_days = 0;
    let state = ctx.open_state();

    let path = ctx.write_log("web.log", "protected by default\n");
    let fingerprint = ctx.fingerprint(&path);
    state.record_uploaded(fingerprint, Utc::now()).await.expect("record");

    let deleted = reclaimer::after_upload_sweep(&config, &state).await;
    assert_eq!(deleted, 0);
    assert!(path.exists(), "allow_deletion = false must block every delete");
  }

  /// Test: a registry entry whose file no source claims is left alone.
  #[tokio::test]
  async fn test_sweep_ignores_unclaimed_paths() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.after_upload_enabled = true;
    config.disk.keep_days = 0;
    let state = ctx.open_state();

    // Uploaded under a root that has since left the config
    let outside_dir = tempfile::TempDir::new().expect("create outside dir");
    let outside = outside_dir.path().join("stray.log");
    std::fs::write(&outside, "stray\n").expect("write stray file");
    let fingerprint = logship_core::Fingerprint::of_path(&outside).expect("fingerprint stray file");
    state
      .record_uploaded(fingerprint, Utc::now() - chrono::Duration::days(30))
      .await
      .expect("record");

    let deleted = reclaimer::after_upload_sweep(&config, &state).await;
    assert_eq!(deleted, 0);
    assert!(outside.exists(), "Files outside every source stay untouched");
  }

  /// Test: the age sweep deletes matching files past max_age_days even if
  /// they were never uploaded, and nothing else.
  #[tokio::test]
  async fn test_age_sweep_deletes_old_files() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.age_based_enabled = true;
    config.disk.max_age_days = 30;
    let state = ctx.open_state();

    let ancient = ctx.write_log("ancient.log", "never shipped\n");
    let fresh = ctx.write_log("fresh.log", "still hot\n");
    let ignored = ctx.write_log("notes.txt", "wrong pattern\n");
    ctx.backdate_secs(&ancient, 31 * 86_400);
    ctx.backdate_secs(&ignored, 31 * 86_400);

    let deleted = reclaimer::age_sweep(&config, &state).await;
    assert_eq!(deleted, 1);
    assert!(!ancient.exists());
    assert!(fresh.exists());
    assert!(ignored.exists(), "Pattern mismatch blocks the age sweep too");
  }

  /// Test: emergency deletion removes oldest uploads first and stops as
  /// soon as usage drops back under the threshold.
  #[tokio::test]
  async fn test_emergency_deletes_oldest_until_recovered() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.emergency_enabled = true;
    config.disk.emergency_threshold = 0.90;
    let state = ctx.open_state();

    let oldest = ctx.write_log("oldest.log", "first in\n");
    let middle = ctx.write_log("middle.log", "second in\n");
    let newest = ctx.write_log("newest.log", "third in\n");
    state
      .record_uploaded(ctx.fingerprint(&oldest), Utc::now() - chrono::Duration::days(3))
      .await
      .expect("record oldest");
    state
      .record_uploaded(ctx.fingerprint(&middle), Utc::now() - chrono::Duration::days(2))
      .await
      .expect("record middle");
    state
      .record_uploaded(ctx.fingerprint(&newest), Utc::now() - chrono::Duration::days(1))
      .await
      .expect("record newest");

    // Over threshold, still over after one delete, recovered after two
    let probe = FakeProbe::new(&[0.95, 0.95, 0.85]);
    let deleted = reclaimer::emergency_sweep(&config, &state, &probe).await;

    assert_eq!(deleted, 2);
    assert!(!oldest.exists(), "Oldest upload goes first");
    assert!(!middle.exists());
    assert!(newest.exists(), "Recovery stops the sweep");
  }

  /// Test: emergency mode never touches files that were not uploaded.
  #[tokio::test]
  async fn test_emergency_skips_unuploaded_files() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.emergency_enabled = true;
    let state = ctx.open_state();

    let path = ctx.write_log("web.log", "not yet shipped\n");
    state.enqueue(ctx.fingerprint(&path), Utc::now()).await.expect("enqueue");

    let probe = FakeProbe::new(&[0.99]);
    let deleted = reclaimer::emergency_sweep(&config, &state, &probe).await;

    assert_eq!(deleted, 0);
    assert!(path.exists(), "Never delete data that is not on the remote");
  }

  /// Test: with keep_days = 0 the reclaimer deletes a file as soon as its
  /// upload is announced.
  #[tokio::test]
  async fn test_upload_event_triggers_immediate_delete() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.sources[0].allow_deletion = true;
    config.disk.after_upload_enabled = true;
    config.disk.keep_days = 0;
    let state = ctx.open_state();

    let path = ctx.write_log("web.log", "shipped\n");
    let fingerprint = ctx.fingerprint(&path);

    let (_config_tx, config_rx) = watch::channel(Arc::new(config));
    let (event_tx, event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = ReclaimerTask::new(
      config_rx,
      state.clone(),
      Arc::new(FakeProbe::new(&[0.10])),
      cancel.clone(),
      event_rx,
      None,
    );
    tokio::spawn(task.run());

    // Let the startup sweeps pass before the upload lands, so the
    // deletion can only come from the event path
    tokio::time::sleep(Duration::from_millis(300)).await;
    state
      .record_uploaded(fingerprint.clone(), Utc::now())
      .await
      .expect("record");

    event_tx
      .send(ReclaimEvent::Uploaded {
        fingerprint,
        uploaded_at: Utc::now(),
      })
      .await
      .expect("reclaimer should be listening");

    assert!(
      wait_for(Duration::from_secs(3), || {
        let path = path.clone();
        async move { !path.exists() }
      })
      .await,
      "File should be deleted right after the upload event"
    );

    cancel.cancel();
  }
}
