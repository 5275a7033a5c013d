//! Configuration for the logship daemon.
//!
//! Config priority: explicit `--config` path > $LOGSHIP_CONFIG_DIR/config.toml
//! > ~/.config/logship/config.toml. Every section is optional in the file;
//! missing sections fall back to defaults.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Sources
// ============================================================================

/// A watched directory that feeds the upload pipeline.
///
/// `root` and `label` are required; everything else defaults. The label
/// namespaces remote keys, so it must be unique and path-safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
  /// Directory to watch (absolute path)
  pub root: PathBuf,

  /// Remote key prefix for files from this source
  pub label: String,

  /// Glob applied to file names (not full paths)
  #[serde(default = "default_pattern")]
  pub pattern: String,

  /// Watch subdirectories too
  #[serde(default)]
  pub recursive: bool,

  /// Allow the reclaimer to delete files from this source
  #[serde(default)]
  pub allow_deletion: bool,
}

fn default_pattern() -> String {
  "*.log".to_string()
}

impl SourceConfig {
  /// Whether `path` sits anywhere under this source's root.
  pub fn contains(&self, path: &Path) -> bool {
    path.starts_with(&self.root)
  }

  /// Whether `path` is an immediate child of the root.
  pub fn is_direct_child(&self, path: &Path) -> bool {
    path.parent() == Some(self.root.as_path())
  }

  /// Whether `file_name` matches this source's glob.
  pub fn pattern_matches(&self, file_name: &str) -> bool {
    glob::Pattern::new(&self.pattern)
      .map(|p| p.matches(file_name))
      .unwrap_or(false)
  }

  /// Whether this source claims `path`: contained, within the recursion
  /// limit, and matching the glob.
  pub fn claims(&self, path: &Path) -> bool {
    if !self.contains(path) {
      return false;
    }
    if !self.recursive && !self.is_direct_child(path) {
      return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
      Some(name) => self.pattern_matches(name),
      None => false,
    }
  }
}

// ============================================================================
// Watcher
// ============================================================================

/// File stability detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  /// Seconds a file must stay quiet before it is considered done (default: 60)
  pub stability_secs: u64,

  /// Files at least this old at startup skip the stability wait (default: 120)
  pub startup_settled_secs: u64,

  /// How often the pending map is swept for settled files, in milliseconds
  /// (default: 1000)
  pub sweep_interval_ms: u64,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      stability_secs: 60,
      startup_settled_secs: 120,
      sweep_interval_ms: 1000,
    }
  }
}

// ============================================================================
// Upload
// ============================================================================

/// Upload orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
  /// Concurrent uploads per batch (default: 4)
  pub parallel_uploads: usize,

  /// When a file becomes ready, process the whole queue instead of just
  /// that file (default: false)
  pub upload_all_on_ready: bool,

  /// Days around a file's mtime searched for remote duplicates, inclusive
  /// (default: 5)
  pub duplicate_window_days: i64,

  /// Base backoff after a transient failure, in seconds (default: 30)
  pub retry_base_secs: u64,

  /// Backoff ceiling in seconds (default: 3600)
  pub retry_cap_secs: u64,

  /// Attempts before a transiently failing file is given up on (default: 10)
  pub max_attempts: u32,

  /// How often the orchestrator checks for due retries and scheduled runs,
  /// in seconds (default: 30)
  pub poll_secs: u64,

  /// Seconds in-flight uploads get to finish at shutdown (default: 30)
  pub shutdown_grace_secs: u64,
}

impl Default for UploadConfig {
  fn default() -> Self {
    Self {
      parallel_uploads: 4,
      upload_all_on_ready: false,
      duplicate_window_days: 5,
      retry_base_secs: 30,
      retry_cap_secs: 3600,
      max_attempts: 10,
      poll_secs: 30,
      shutdown_grace_secs: 30,
    }
  }
}

// ============================================================================
// Schedule
// ============================================================================

/// When scheduled full-queue runs fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
  #[default]
  Interval,
  Daily,
}

/// Scheduled runs and operational hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// interval = every N minutes, daily = once a day at `daily_at`
  pub mode: ScheduleMode,

  /// Minutes between runs in interval mode (default: 60)
  pub every_minutes: u64,

  /// Local time of the daily run, "HH:MM" (default: "02:30")
  pub daily_at: String,

  /// Restrict ready-triggered uploads to a local-time window. Scheduled
  /// runs ignore the window. (default: false)
  pub hours_enabled: bool,

  /// Window start, "HH:MM" (default: "08:00")
  pub hours_start: String,

  /// Window end, "HH:MM"; start > end wraps past midnight (default: "18:00")
  pub hours_end: String,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      mode: ScheduleMode::Interval,
      every_minutes: 60,
      daily_at: "02:30".to_string(),
      hours_enabled: false,
      hours_start: "08:00".to_string(),
      hours_end: "18:00".to_string(),
    }
  }
}

/// Parse an "HH:MM" string into a time of day.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
  NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

// ============================================================================
// Remote store
// ============================================================================

/// Remote store backend options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
  /// A directory tree, typically a mounted network share
  #[default]
  Dir,
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteConfig {
  /// Which backend to upload to
  pub backend: RemoteBackend,

  /// Target directory for the dir backend (required, absolute)
  pub root: PathBuf,
}

// ============================================================================
// Disk reclamation
// ============================================================================

/// Local disk reclamation policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
  /// Delete local files once their upload is `keep_days` old (default: true)
  pub after_upload_enabled: bool,

  /// Days to keep a file after upload; 0 deletes right away (default: 7)
  pub keep_days: i64,

  /// Seconds between after-upload sweeps (default: 600)
  pub sweep_interval_secs: u64,

  /// Delete any matching file older than `max_age_days`, uploaded or not
  /// (default: false)
  pub age_based_enabled: bool,

  /// Age cutoff for the daily sweep, in days (default: 30)
  pub max_age_days: i64,

  /// Local time of the daily age sweep, "HH:MM" (default: "03:00")
  pub age_sweep_at: String,

  /// Delete oldest uploaded files when disk usage crosses the threshold
  /// (default: false)
  pub emergency_enabled: bool,

  /// Usage fraction (0..=1) that triggers emergency deletion (default: 0.90)
  pub emergency_threshold: f64,

  /// Seconds between disk usage probes (default: 60)
  pub emergency_poll_secs: u64,
}

impl Default for DiskConfig {
  fn default() -> Self {
    Self {
      after_upload_enabled: true,
      keep_days: 7,
      sweep_interval_secs: 600,
      age_based_enabled: false,
      max_age_days: 30,
      age_sweep_at: "03:00".to_string(),
      emergency_enabled: false,
      emergency_threshold: 0.90,
      emergency_poll_secs: 60,
    }
  }
}

// ============================================================================
// Dedup registry
// ============================================================================

/// Upload registry retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
  /// Days an upload record is kept for dedup (default: 90)
  pub retention_days: i64,

  /// Hours between retention sweeps; one also runs at startup (default: 6)
  pub sweep_interval_hours: u64,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      retention_days: 90,
      sweep_interval_hours: 6,
    }
  }
}

// ============================================================================
// Daemon
// ============================================================================

/// Daemon process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: off, error, warn, info, debug, trace (default: info)
  pub log_level: String,

  /// Log rotation: daily, hourly, never (default: daily)
  pub log_rotation: String,

  /// Days of daemon logs to keep; 0 keeps forever (default: 7)
  pub log_retention_days: u64,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
      log_retention_days: 7,
    }
  }
}

// ============================================================================
// Top-level config
// ============================================================================

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  /// Watched directories
  pub sources: Vec<SourceConfig>,

  /// Stability detection
  pub watcher: WatcherConfig,

  /// Upload orchestration
  pub upload: UploadConfig,

  /// Scheduled runs and operational hours
  pub schedule: ScheduleConfig,

  /// Remote store
  pub remote: RemoteConfig,

  /// Disk reclamation
  pub disk: DiskConfig,

  /// Dedup registry retention
  pub registry: RegistryConfig,

  /// Daemon process settings
  pub daemon: DaemonConfig,
}

/// Errors from loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("Invalid config: {0}")]
  Invalid(String),
}

impl Config {
  /// Load configuration.
  ///
  /// An explicit path must exist and parse. Without one, the user config
  /// is used if present; a missing user config is not an error, but a
  /// broken one is — a shipper silently running on defaults while the
  /// operator's deletion policies sit unread would be worse.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::from_file(path);
    }

    if let Some(path) = Self::user_config_path()
      && path.exists()
    {
      return Self::from_file(&path);
    }

    Ok(Self::default())
  }

  /// Load and parse a specific config file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source: Box::new(source),
    })
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("LOGSHIP_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("logship").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("logship").join("config.toml"))
  }

  /// The source whose root is the longest prefix of `path`, if any.
  pub fn source_for(&self, path: &Path) -> Option<&SourceConfig> {
    self
      .sources
      .iter()
      .filter(|s| s.contains(path))
      .max_by_key(|s| s.root.components().count())
  }

  /// Reject configurations that cannot run safely.
  pub fn ensure_valid(&self) -> Result<(), ConfigError> {
    let mut labels = std::collections::HashSet::new();
    for source in &self.sources {
      if source.label.is_empty() {
        return Err(ConfigError::Invalid(format!(
          "source {} has an empty label",
          source.root.display()
        )));
      }
      if source.label.contains('/') || source.label.contains('\\') || source.label.contains("..") {
        return Err(ConfigError::Invalid(format!(
          "source label {:?} must be path-safe",
          source.label
        )));
      }
      if !labels.insert(source.label.as_str()) {
        return Err(ConfigError::Invalid(format!("duplicate source label {:?}", source.label)));
      }
      if !source.root.is_absolute() {
        return Err(ConfigError::Invalid(format!(
          "source root {} must be absolute",
          source.root.display()
        )));
      }
      if let Err(e) = glob::Pattern::new(&source.pattern) {
        return Err(ConfigError::Invalid(format!(
          "source {:?} has a bad pattern {:?}: {}",
          source.label, source.pattern, e
        )));
      }
    }

    match self.remote.backend {
      RemoteBackend::Dir => {
        if self.remote.root.as_os_str().is_empty() {
          return Err(ConfigError::Invalid("remote.root is required for the dir backend".into()));
        }
        if !self.remote.root.is_absolute() {
          return Err(ConfigError::Invalid(format!(
            "remote.root {} must be absolute",
            self.remote.root.display()
          )));
        }
      }
    }

    if self.upload.max_attempts == 0 {
      return Err(ConfigError::Invalid("upload.max_attempts must be at least 1".into()));
    }
    if self.upload.parallel_uploads == 0 {
      return Err(ConfigError::Invalid("upload.parallel_uploads must be at least 1".into()));
    }
    if self.upload.duplicate_window_days < 0 {
      return Err(ConfigError::Invalid("upload.duplicate_window_days must be >= 0".into()));
    }

    if self.schedule.mode == ScheduleMode::Interval && self.schedule.every_minutes == 0 {
      return Err(ConfigError::Invalid("schedule.every_minutes must be at least 1".into()));
    }
    if parse_hhmm(&self.schedule.daily_at).is_none() {
      return Err(ConfigError::Invalid(format!(
        "schedule.daily_at {:?} is not HH:MM",
        self.schedule.daily_at
      )));
    }
    if self.schedule.hours_enabled {
      if parse_hhmm(&self.schedule.hours_start).is_none() {
        return Err(ConfigError::Invalid(format!(
          "schedule.hours_start {:?} is not HH:MM",
          self.schedule.hours_start
        )));
      }
      if parse_hhmm(&self.schedule.hours_end).is_none() {
        return Err(ConfigError::Invalid(format!(
          "schedule.hours_end {:?} is not HH:MM",
          self.schedule.hours_end
        )));
      }
    }

    if self.disk.keep_days < 0 {
      return Err(ConfigError::Invalid("disk.keep_days must be >= 0".into()));
    }
    if self.disk.max_age_days < 1 {
      return Err(ConfigError::Invalid("disk.max_age_days must be at least 1".into()));
    }
    if parse_hhmm(&self.disk.age_sweep_at).is_none() {
      return Err(ConfigError::Invalid(format!(
        "disk.age_sweep_at {:?} is not HH:MM",
        self.disk.age_sweep_at
      )));
    }
    if !(self.disk.emergency_threshold > 0.0 && self.disk.emergency_threshold <= 1.0) {
      return Err(ConfigError::Invalid(
        "disk.emergency_threshold must be in (0.0, 1.0]".into(),
      ));
    }

    if self.registry.retention_days < 1 {
      return Err(ConfigError::Invalid("registry.retention_days must be at least 1".into()));
    }

    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# logship configuration
# Place at ~/.config/logship/config.toml or pass with --config

# ============================================================================
# Sources
# ============================================================================
# Each [[sources]] entry is a watched directory. `label` namespaces the
# remote keys and must be unique. Deletion is off per source until
# `allow_deletion = true`; the global policies below never override this.

[[sources]]
root = "/var/log/app"
label = "app"
pattern = "*.log"
recursive = false
allow_deletion = false

# ============================================================================
# Stability Detection
# ============================================================================

[watcher]
# Seconds of quiet before a file counts as done being written
stability_secs = 60

# Files at least this old when the daemon starts upload immediately
startup_settled_secs = 120

# Pending-map sweep cadence (milliseconds)
sweep_interval_ms = 1000

# ============================================================================
# Upload
# ============================================================================

[upload]
# Concurrent uploads per batch
parallel_uploads = 4

# When one file becomes ready: false = upload just that file,
# true = process the whole queue
upload_all_on_ready = false

# Days around a file's mtime searched for remote duplicates (inclusive)
duplicate_window_days = 5

# Transient-failure backoff: min(retry_cap_secs, retry_base_secs * 2^attempts)
retry_base_secs = 30
retry_cap_secs = 3600

# Give up on a file after this many failed attempts
max_attempts = 10

# Orchestrator poll cadence for due retries and scheduled runs (seconds)
poll_secs = 30

# Seconds in-flight uploads get to finish at shutdown
shutdown_grace_secs = 30

# ============================================================================
# Schedule
# ============================================================================

[schedule]
# interval = full-queue run every N minutes, daily = once a day
mode = "interval"
every_minutes = 60
daily_at = "02:30"

# Operational hours gate ready-triggered uploads only; scheduled runs
# always go through. Start > end wraps past midnight.
hours_enabled = false
hours_start = "08:00"
hours_end = "18:00"

# ============================================================================
# Remote Store
# ============================================================================

[remote]
# dir = a directory tree, typically a mounted network share
backend = "dir"
root = "/mnt/logmirror"

# ============================================================================
# Disk Reclamation
# ============================================================================

[disk]
# Delete local files once their upload is keep_days old (0 = right away)
after_upload_enabled = true
keep_days = 7
sweep_interval_secs = 600

# Daily sweep deleting ANY matching file older than max_age_days,
# uploaded or not
age_based_enabled = false
max_age_days = 30
age_sweep_at = "03:00"

# Delete oldest uploaded files when disk usage crosses the threshold
emergency_enabled = false
emergency_threshold = 0.90
emergency_poll_secs = 60

# ============================================================================
# Dedup Registry
# ============================================================================

[registry]
# Days an upload record is kept; swept at startup and every few hours
retention_days = 90
sweep_interval_hours = 6

# ============================================================================
# Daemon
# ============================================================================

[daemon]
# Log level: off, error, warn, info, debug, trace
log_level = "info"

# Log rotation: daily, hourly, never
log_rotation = "daily"

# Days of daemon logs to keep (0 = keep forever)
log_retention_days = 7
"#
    .to_string()
  }
}
