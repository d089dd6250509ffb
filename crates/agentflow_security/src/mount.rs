//! Mount allowlist enforcement (spec.md §4.2 "Mount safety", §5 shared-resource
//! policy: "re-read on each spawn decision, no caching required").
//!
//! Repurposes the teacher's `Gatekeeper`/`GatekeeperReport` shape — a static
//! validator returning a `{errors, warnings}` report — for path-based mount
//! validation instead of Python-AST scanning.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A spawn was refused because a requested mount violated the allowlist.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("mount path {0} is outside all allowed roots")]
    OutsideAllowedRoots(String),
    #[error("mount path {0} matches blocked pattern {1}")]
    BlockedPattern(String, String),
}

/// Result of validating a batch of requested mounts.
#[derive(Debug, Clone, Default)]
pub struct MountReport {
    pub errors: Vec<SecurityError>,
    pub warnings: Vec<String>,
}

impl MountReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// On-disk shape of the allowlist file, stored outside the workspace
/// (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountAllowlist {
    pub allowed_roots: Vec<PathBuf>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    /// Non-main groups are forced read-only when set.
    #[serde(default)]
    pub non_main_read_only: bool,
}

impl MountAllowlist {
    /// Re-read the allowlist from disk. The spec requires no caching: callers
    /// invoke this on every spawn decision.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Validate a single requested mount path against the allowlist.
    pub fn validate_one(&self, mount: &Path) -> Result<(), SecurityError> {
        let canonical = normalize(mount);

        for pattern in &self.blocked_patterns {
            if canonical.to_string_lossy().contains(pattern.as_str()) {
                return Err(SecurityError::BlockedPattern(
                    canonical.display().to_string(),
                    pattern.clone(),
                ));
            }
        }

        let within_root = self
            .allowed_roots
            .iter()
            .any(|root| canonical.starts_with(normalize(root)));
        if !within_root {
            return Err(SecurityError::OutsideAllowedRoots(
                canonical.display().to_string(),
            ));
        }

        Ok(())
    }

    /// Validate every requested mount, collecting violations rather than
    /// short-circuiting on the first one.
    pub fn validate_all(&self, mounts: &[PathBuf]) -> MountReport {
        let mut report = MountReport::default();
        for mount in mounts {
            if let Err(err) = self.validate_one(mount) {
                report.errors.push(err);
            }
        }
        report
    }
}

/// Lexical normalization (no filesystem access — mounts may not exist yet).
/// Collapses `.` and resolves `..` within the path string itself.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> MountAllowlist {
        MountAllowlist {
            allowed_roots: vec![PathBuf::from("/groups")],
            blocked_patterns: vec!["/.ssh".to_string(), "/etc/shadow".to_string()],
            non_main_read_only: true,
        }
    }

    #[test]
    fn mount_inside_allowed_root_passes() {
        let list = allowlist();
        assert!(list.validate_one(Path::new("/groups/main/workspace")).is_ok());
    }

    #[test]
    fn mount_outside_allowed_roots_is_rejected() {
        let list = allowlist();
        let err = list.validate_one(Path::new("/home/user/secrets")).unwrap_err();
        assert!(matches!(err, SecurityError::OutsideAllowedRoots(_)));
    }

    #[test]
    fn mount_matching_blocked_pattern_is_rejected_even_inside_root() {
        let list = allowlist();
        let err = list
            .validate_one(Path::new("/groups/main/.ssh"))
            .unwrap_err();
        assert!(matches!(err, SecurityError::BlockedPattern(_, _)));
    }

    #[test]
    fn dot_dot_traversal_is_normalized_before_the_root_check() {
        let list = allowlist();
        let err = list
            .validate_one(Path::new("/groups/main/../../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, SecurityError::OutsideAllowedRoots(_)));
    }

    #[test]
    fn validate_all_collects_every_violation() {
        let list = allowlist();
        let report = list.validate_all(&[
            PathBuf::from("/groups/main/workspace"),
            PathBuf::from("/outside"),
            PathBuf::from("/groups/x/.ssh"),
        ]);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_ok());
    }
}
