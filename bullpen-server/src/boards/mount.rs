//! Mount path rules.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static MOUNT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/[A-Za-z0-9._~-]+)+$").expect("static regex compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid mount path {path:?}: expected /segment[/segment...] using letters, digits, '.', '_', '~' or '-'"
)]
pub struct InvalidMountPath {
    pub path: String,
}

/// Trim whitespace and trailing slashes, then check the shape.
///
/// `"/board1/"` becomes `"/board1"`. The root path and relative paths are
/// rejected, as are `.` and `..` segments.
pub fn normalize_mount_path(raw: &str) -> Result<String, InvalidMountPath> {
    let invalid = || InvalidMountPath {
        path: raw.to_string(),
    };

    let trimmed = raw.trim().trim_end_matches('/');
    if !MOUNT_PATH.is_match(trimmed) {
        return Err(invalid());
    }
    if trimmed.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(invalid());
    }
    Ok(trimmed.to_string())
}

/// Whether requests could be routed to both paths: equal, or one is a
/// segment prefix of the other (`/a` and `/a/b`, but not `/a` and `/ab`).
pub fn mount_paths_overlap(a: &str, b: &str) -> bool {
    fn is_segment_prefix(prefix: &str, path: &str) -> bool {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
    is_segment_prefix(a, b) || is_segment_prefix(b, a)
}
