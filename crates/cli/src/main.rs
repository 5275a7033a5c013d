//! Logship CLI - ship settled log files to a remote store

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{
  DAEMONIZED_ENV, cmd_completions, cmd_config_init, cmd_config_show, cmd_once, cmd_run, cmd_status, respawn_detached,
};
use logging::{init_cli_logging, init_daemon_logging_with_config};

#[derive(Parser)]
#[command(name = "logship")]
#[command(about = "Ship settled log files to a remote store")]
#[command(after_help = "\
QUICK START:
  logship config init             # Write a starter config
  logship once                    # One scan-and-drain pass, then exit
  logship run                     # Run the shipper in the foreground
  logship run --background        # Detach and keep shipping

OPERATIONS:
  logship status                  # Queue and registry summary
  logship config show             # Effective configuration")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `logship config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which config file is being used and its contents as TOML.")]
  Show,

  /// Initialize the user config file
  #[command(long_about = "Initialize the user-level configuration file.\n\n\
    Writes a commented starter config. Sources must be filled in before\n\
    the shipper picks anything up.")]
  Init,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the shipper until signalled
  #[command(after_help = "\
SIGNALS:
  INT/TERM   drain in-flight uploads, then exit
  HUP        reload the config file")]
  Run {
    /// Detach from the terminal and log to file
    #[arg(long)]
    background: bool,
    /// Config file to use instead of the user config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
  },
  /// Run one scan-and-drain pass, then exit
  #[command(long_about = "Run one scan-and-drain pass, then exit.\n\n\
    Scans the configured sources for settled files, drains the queue once,\n\
    applies deletion policies, and prints what happened. Exits nonzero if\n\
    any upload failed.")]
  Once {
    /// Config file to use instead of the user config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
  },
  /// Summarize persisted queue and registry state
  Status,
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATION:
  ~/.config/logship/config.toml (or $LOGSHIP_CONFIG_DIR/config.toml)")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Generate shell completions
  Completions {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Detach before logging setup so the parent never opens the log file
  if let Commands::Run {
    background: true,
    config,
  } = &cli.command
    && std::env::var_os(DAEMONIZED_ENV).is_none()
  {
    return respawn_detached(config.as_deref());
  }

  // Use file logging for the daemon, console-only for other commands
  let _guard = match &cli.command {
    Commands::Run { background, config } => init_daemon_logging_with_config(config.as_deref(), !background),
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Run { config, .. } => cmd_run(config.as_deref()).await,
    Commands::Once { config } => cmd_once(config.as_deref()).await,
    Commands::Status => cmd_status(),
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(),
      ConfigCommand::Init => cmd_config_init(),
    },
    Commands::Completions { shell } => cmd_completions(shell, &mut Cli::command()),
  }
}
