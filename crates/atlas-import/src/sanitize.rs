//! Helpers for keeping user paths out of log lines and span attributes.
//!
//! Uploaded files live in per-session temp directories whose full paths
//! reveal the user's home directory and temp layout. Log the file name or a
//! hash instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Turns an archive entry name into a relative path that cannot leave the
/// extraction directory.
///
/// Backslashes are treated as separators. Root, prefix, `.` and `..`
/// components are dropped, so `../../etc/passwd` becomes `etc/passwd`.
pub fn relative_entry_path(name: &str) -> PathBuf {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Returns `true` when [`relative_entry_path`] would change the name.
pub fn is_unsafe_entry_name(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
