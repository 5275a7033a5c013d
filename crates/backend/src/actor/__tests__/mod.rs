//! Pipeline tests for the watcher, uploader, and reclaimer tasks.

mod end_to_end;
pub mod helpers;
mod reclaimer;
mod watcher;
