//! Deletion safety gates.
//!
//! Every local delete, regardless of which policy asked for it, must pass
//! [`clearance`]. The gates run in a fixed order and the first refusal wins:
//! protected system path, per-source deletion opt-in, recursion containment,
//! then the source's filename glob.

use logship_core::config::SourceConfig;
use std::path::Path;

/// System roots no source may ever delete under, no matter its config.
pub const PROTECTED_ROOTS: &[&str] = &[
  "/", "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/root", "/run", "/sbin", "/sys", "/usr",
];

/// Why a deletion was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
  ProtectedPath,
  DeletionNotAllowed,
  OutsideRecursion,
  PatternMismatch,
}

impl std::fmt::Display for Refusal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::ProtectedPath => write!(f, "path is under a protected system root"),
      Self::DeletionNotAllowed => write!(f, "source does not allow deletion"),
      Self::OutsideRecursion => write!(f, "path is outside the source's recursion limit"),
      Self::PatternMismatch => write!(f, "file name does not match the source pattern"),
    }
  }
}

/// Whether `path` falls under a protected system root.
///
/// Comparison is component-wise, so /libexec is not under /lib.
pub fn is_protected(path: &Path) -> bool {
  if path == Path::new("/") {
    return true;
  }
  PROTECTED_ROOTS.iter().skip(1).any(|root| {
    let root = Path::new(root);
    path == root || path.starts_with(root)
  })
}

/// Check whether `path` may be deleted on behalf of `source`.
///
/// Note: std::fs::remove_file on a symlink unlinks the link itself, never
/// the target, so a link smuggled into a source cannot reach outside it.
pub fn clearance(path: &Path, source: &SourceConfig) -> Result<(), Refusal> {
  if is_protected(path) {
    return Err(Refusal::ProtectedPath);
  }
  if !source.allow_deletion {
    return Err(Refusal::DeletionNotAllowed);
  }
  if !source.recursive && !source.is_direct_child(path) {
    return Err(Refusal::OutsideRecursion);
  }
  let matches = path
    .file_name()
    .and_then(|n| n.to_str())
    .map(|n| source.pattern_matches(n))
    .unwrap_or(false);
  if !matches {
    return Err(Refusal::PatternMismatch);
  }
  Ok(())
}
