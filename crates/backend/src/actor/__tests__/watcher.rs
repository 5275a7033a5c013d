//! Watcher tests: stability windows, startup scanning, claim filtering.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use tokio::time::timeout;

  use crate::actor::__tests__::helpers::{ShipperTestContext, spawn_watcher};

  /// Test: a file is emitted exactly once after its stability window.
  #[tokio::test]
  async fn test_settled_file_emitted_once() {
    let ctx = ShipperTestContext::new();
    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(ctx.config.clone());

    // Let the startup scan pass over the empty directory first
    tokio::time::sleep(Duration::from_millis(100)).await;
    let path = ctx.write_log("web.log", "one line\n");

    let ready = timeout(Duration::from_secs(5), ready_rx.recv())
      .await
      .expect("file should settle within the window")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, path);
    assert_eq!(ready.fingerprint.size, "one line\n".len() as u64);

    let second = timeout(Duration::from_millis(1500), ready_rx.recv()).await;
    assert!(second.is_err(), "Settled file should be emitted exactly once");

    cancel.cancel();
  }

  /// Test: continued writes push the stability window back; the final
  /// contents are what gets emitted.
  #[tokio::test]
  async fn test_rewrite_rearms_window() {
    let ctx = ShipperTestContext::new();
    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(ctx.config.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    ctx.write_log("web.log", "first\n");
    tokio::time::sleep(Duration::from_millis(400)).await;
    let path = ctx.write_log("web.log", "first\nsecond\n");

    let ready = timeout(Duration::from_secs(5), ready_rx.recv())
      .await
      .expect("file should settle after writes stop")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, path);
    assert_eq!(
      ready.fingerprint.size,
      "first\nsecond\n".len() as u64,
      "Emission should carry the final contents"
    );

    let more = timeout(Duration::from_millis(1500), ready_rx.recv()).await;
    assert!(more.is_err(), "Rewrites before settling should not double-emit");

    cancel.cancel();
  }

  /// Test: files already past the settled threshold at startup are emitted
  /// by the scan without waiting out a fresh stability window.
  #[tokio::test]
  async fn test_startup_scan_emits_old_files() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    // A window far too long to pass during the test
    config.watcher.stability_secs = 3600;

    let path = ctx.write_log("web.log", "old\n");
    ctx.backdate_secs(&path, 200);

    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(config);
    let ready = timeout(Duration::from_secs(3), ready_rx.recv())
      .await
      .expect("settled file should be emitted by the startup scan")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, path);

    cancel.cancel();
  }

  /// Test: files still inside the settled threshold at startup keep
  /// waiting for their stability window instead of shipping early.
  #[tokio::test]
  async fn test_startup_scan_defers_recent_files() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.watcher.stability_secs = 3600;

    let path = ctx.write_log("web.log", "recent\n");
    ctx.backdate_secs(&path, 60);

    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(config);
    let emitted = timeout(Duration::from_secs(2), ready_rx.recv()).await;
    assert!(emitted.is_err(), "Recent file should wait out the stability window");
    assert!(path.exists());

    cancel.cancel();
  }

  /// Test: a file exactly as old as the settled threshold ships from the
  /// startup scan; the threshold is inclusive.
  #[tokio::test]
  async fn test_startup_scan_threshold_is_inclusive() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    // If the scan deferred this file it would sit here far past the timeout
    config.watcher.stability_secs = 3600;

    let path = ctx.write_log("web.log", "boundary\n");
    ctx.backdate_secs(&path, config.watcher.startup_settled_secs);

    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(config);
    let ready = timeout(Duration::from_secs(3), ready_rx.recv())
      .await
      .expect("file at the threshold should be emitted immediately")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, path);

    cancel.cancel();
  }

  /// Test: a non-recursive source ignores files in subdirectories.
  #[tokio::test]
  async fn test_non_recursive_ignores_subdirs() {
    let ctx = ShipperTestContext::new();
    let top = ctx.write_log("top.log", "top\n");
    let nested = ctx.write_log("archive/nested.log", "nested\n");
    ctx.backdate_secs(&top, 200);
    ctx.backdate_secs(&nested, 200);

    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(ctx.config.clone());

    let ready = timeout(Duration::from_secs(3), ready_rx.recv())
      .await
      .expect("top-level file should be emitted")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, top);

    let more = timeout(Duration::from_millis(1000), ready_rx.recv()).await;
    assert!(more.is_err(), "Nested file is outside a non-recursive source");

    cancel.cancel();
  }

  /// Test: only files matching the source pattern are shipped.
  #[tokio::test]
  async fn test_pattern_filters_files() {
    let ctx = ShipperTestContext::new();
    let log = ctx.write_log("app.log", "keep\n");
    let txt = ctx.write_log("notes.txt", "skip\n");
    ctx.backdate_secs(&log, 200);
    ctx.backdate_secs(&txt, 200);

    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(ctx.config.clone());

    let ready = timeout(Duration::from_secs(3), ready_rx.recv())
      .await
      .expect("log file should be emitted")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, log);

    let more = timeout(Duration::from_millis(1000), ready_rx.recv()).await;
    assert!(more.is_err(), "Non-matching file should be ignored");

    cancel.cancel();
  }

  /// Test: a file deleted before it settles is never emitted.
  #[tokio::test]
  async fn test_removed_file_not_emitted() {
    let ctx = ShipperTestContext::new();
    let (mut ready_rx, cancel, _config_tx) = spawn_watcher(ctx.config.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let path = ctx.write_log("web.log", "short lived\n");
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::remove_file(&path).expect("remove log");

    let emitted = timeout(Duration::from_secs(2), ready_rx.recv()).await;
    assert!(emitted.is_err(), "Deleted file should never be emitted");

    cancel.cancel();
  }

  /// Test: a shorter stability window applies to already-pending files
  /// after a live config update.
  #[tokio::test]
  async fn test_stability_reload_applies_to_pending() {
    let ctx = ShipperTestContext::new();
    let mut config = ctx.config.clone();
    config.watcher.stability_secs = 3600;

    let (mut ready_rx, cancel, config_tx) = spawn_watcher(config.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let path = ctx.write_log("web.log", "waiting\n");
    tokio::time::sleep(Duration::from_millis(300)).await;

    config.watcher.stability_secs = 1;
    config_tx.send(Arc::new(config)).expect("watcher should be subscribed");

    let ready = timeout(Duration::from_secs(5), ready_rx.recv())
      .await
      .expect("pending file should settle under the reloaded window")
      .expect("watcher should still be running");
    assert_eq!(ready.fingerprint.path, path);

    cancel.cancel();
  }
}
