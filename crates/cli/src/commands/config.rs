//! Config commands

use anyhow::Result;
use logship_core::Config;
use tracing::error;

/// Show current effective configuration
pub fn cmd_config_show() -> Result<()> {
  let user_config = Config::user_config_path();

  // Check which config file is being used
  let source = user_config.filter(|p| p.exists());
  let config = match &source {
    Some(path) => Config::from_file(path)?,
    None => Config::default(),
  };

  match &source {
    Some(path) => println!("Using config: {:?}", path),
    None => println!("Using default configuration (no config file found)"),
  }
  println!();

  // Show config as TOML
  let toml_str = toml::to_string_pretty(&config)?;
  println!("{}", toml_str);

  // Surface validation problems here rather than at the next daemon start
  if let Err(e) = config.ensure_valid() {
    println!();
    println!("WARNING: {}", e);
  }

  Ok(())
}

/// Initialize the user configuration file
pub fn cmd_config_init() -> Result<()> {
  let Some(config_path) = Config::user_config_path() else {
    error!("Could not determine a config directory on this platform");
    std::process::exit(1);
  };

  if config_path.exists() {
    error!("Config file already exists: {:?}", config_path);
    println!("Delete it first if you want to regenerate");
    std::process::exit(1);
  }

  // Create the config directory if needed
  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent)?;
  }

  std::fs::write(&config_path, Config::generate_template())?;

  println!("Created config: {:?}", config_path);
  println!();
  println!("Add [[sources]] entries, then try: logship once");
  Ok(())
}
