//! Pure scheduling decisions: operational-hours windows and run cadence.
//!
//! Everything here works on naive local times handed in by the caller, so
//! the logic stays testable without clocks or timers. The hours window only
//! gates ready-file dispatch; scheduled and startup runs always proceed.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use logship_core::config::{ScheduleConfig, ScheduleMode, parse_hhmm};
use tracing::warn;

// ============================================================================
// Operational hours
// ============================================================================

/// A daily local-time window, possibly wrapping past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoursWindow {
  start: NaiveTime,
  end: NaiveTime,
}

impl HoursWindow {
  /// Build the window from config. Returns None when hours are disabled or
  /// the configured times do not parse, which leaves the gate open.
  pub fn from_config(config: &ScheduleConfig) -> Option<Self> {
    if !config.hours_enabled {
      return None;
    }
    match (parse_hhmm(&config.hours_start), parse_hhmm(&config.hours_end)) {
      (Some(start), Some(end)) => Some(Self { start, end }),
      _ => {
        warn!(
          start = %config.hours_start,
          end = %config.hours_end,
          "Ignoring unparseable operational hours"
        );
        None
      }
    }
  }

  /// Whether `at` falls inside the window. Start is inclusive, end is
  /// exclusive. When start > end the window wraps past midnight.
  pub fn contains(&self, at: NaiveTime) -> bool {
    if self.start <= self.end {
      at >= self.start && at < self.end
    } else {
      at >= self.start || at < self.end
    }
  }
}

/// Whether a ready-triggered upload may dispatch right now.
pub fn dispatch_allowed(now: NaiveTime, window: Option<&HoursWindow>) -> bool {
  window.map(|w| w.contains(now)).unwrap_or(true)
}

// ============================================================================
// Scheduled runs
// ============================================================================

/// Cadence of full-queue runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  Interval(Duration),
  Daily(NaiveTime),
}

impl RunMode {
  pub fn from_config(config: &ScheduleConfig) -> Self {
    match config.mode {
      ScheduleMode::Interval => {
        let minutes = config.every_minutes.max(1).min(i64::MAX as u64) as i64;
        Self::Interval(Duration::minutes(minutes))
      }
      ScheduleMode::Daily => {
        let at = parse_hhmm(&config.daily_at).unwrap_or_else(|| {
          warn!(daily_at = %config.daily_at, "Unparseable daily run time, using midnight");
          NaiveTime::default()
        });
        Self::Daily(at)
      }
    }
  }
}

/// Whether a scheduled run is due at `now` given when the last run fired.
pub fn run_due(now: NaiveDateTime, last_run: NaiveDateTime, mode: &RunMode) -> bool {
  match mode {
    RunMode::Interval(every) => now.signed_duration_since(last_run) >= *every,
    RunMode::Daily(at) => {
      let today_at = now.date().and_time(*at);
      now >= today_at && last_run < today_at
    }
  }
}
