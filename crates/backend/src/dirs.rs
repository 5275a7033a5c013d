/// Get the default base path for logship data (queue, registry, logs)
///
/// Respects the following environment variables (in order of precedence):
/// 1. LOGSHIP_DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> std::path::PathBuf {
  // Check explicit override first
  if let Ok(dir) = std::env::var("LOGSHIP_DATA_DIR") {
    return std::path::PathBuf::from(dir);
  }

  // Check XDG_DATA_HOME
  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return std::path::PathBuf::from(xdg_data).join("logship");
  }

  // Fall back to platform default
  dirs::data_local_dir()
    .unwrap_or_else(|| std::path::PathBuf::from("."))
    .join("logship")
}

/// Get the directory daemon log files are written to
pub fn default_log_dir() -> std::path::PathBuf {
  default_data_dir().join("logs")
}
