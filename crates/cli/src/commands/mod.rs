//! CLI command implementations

mod completions;
mod config;
mod once;
mod run;
mod status;

pub use completions::cmd_completions;
pub use config::{cmd_config_init, cmd_config_show};
pub use once::cmd_once;
pub use run::{DAEMONIZED_ENV, cmd_run, respawn_detached};
pub use status::cmd_status;
