//! Shell completions command

use anyhow::Result;
use clap_complete::{Shell, generate};
use std::io;

/// Print a completion script for the given shell to stdout
pub fn cmd_completions(shell: Shell, cmd: &mut clap::Command) -> Result<()> {
  let name = cmd.get_name().to_string();
  generate(shell, cmd, name, &mut io::stdout());
  Ok(())
}
