//! Long-lived daemon tasks and the channels between them.
//!
//! Each component runs as its own task with an event loop; they talk over
//! `mpsc` channels and share only the [`StateStore`](crate::state::StateStore).
//!
//! ```text
//! WatcherTask ──ReadyFile──▶ UploaderTask ──ReclaimEvent──▶ ReclaimerTask
//! ```
//!
//! - [`WatcherTask`]: watches source dirs, emits files once they settle
//! - [`UploaderTask`]: owns the queue, uploads with retry and dedup
//! - [`ReclaimerTask`]: deletes local files per the disk policies

pub mod handle;
pub mod message;

pub(crate) mod reclaimer;
pub(crate) mod uploader;
mod watcher;

#[cfg(test)]
mod __tests__;

pub use reclaimer::{DiskUsageProbe, ReclaimerTask, StatvfsProbe};
pub use uploader::UploaderTask;
pub use watcher::{WatcherError, WatcherTask};
