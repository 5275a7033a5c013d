mod actor;
mod guard;
mod metrics;
mod remote;
mod schedule;

pub mod dirs;
pub mod state;

mod daemon;
pub use actor::WatcherError;
pub use daemon::{Daemon, DaemonError, OnceReport, RuntimeConfig};
pub use remote::{BlobStore, StoreError};
