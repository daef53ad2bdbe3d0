//! Shared path utilities: syntactic normalization and foreign-metadata detection.

use std::path::{Component, Path, PathBuf};

/// Prefix used by macOS AppleDouble resource-fork files (`._name`).
pub const RESOURCE_FORK_PREFIX: &str = "._";

/// Whether the final component of `path` is a resource-fork artifact.
///
/// These files are left behind by foreign filesystems on removable media and
/// never carry record data.
pub fn is_resource_fork(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(RESOURCE_FORK_PREFIX))
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// Volume membership is decided on the normalized form so that
/// `/flash/../etc/passwd` is not treated as living on `/flash`.
pub fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Whether `a` and `b` name the same file.
///
/// Syntactically equal paths match. Otherwise paths that both exist are
/// compared in canonical form, which catches symlinks.
pub fn refers_to_same_file(a: &Path, b: &Path) -> bool {
    if normalize_syntactic(a) == normalize_syntactic(b) {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
