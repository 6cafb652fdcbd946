//! Path validation: filesystem sandboxing to configured roots.
//!
//! File tools may only touch paths that resolve inside one of the allowed
//! roots. Resolution expands `~`, anchors relative paths at the current
//! directory, folds `.`/`..` lexically, and follows symlinks for the part of
//! the path that already exists, so a link pointing outside a root is caught.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed directories")]
    OutsideAllowedRoots { path: String },

    #[error("No allowed directories are configured")]
    NoAllowedRoots,

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

/// Resolve `path` and check it lies within one of `allowed_roots`.
///
/// Returns the resolved path on success. The target itself need not exist.
pub fn validate_path(path: &str, allowed_roots: &[String]) -> Result<PathBuf, PathValidationError> {
    if allowed_roots.is_empty() {
        return Err(PathValidationError::NoAllowedRoots);
    }

    let resolved = resolve(path)?;

    let inside = allowed_roots
        .iter()
        .filter_map(|root| resolve(root).ok())
        .any(|root| is_within(&resolved, &root));

    if !inside {
        return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
    }

    Ok(resolved)
}

/// Expand `~`, make absolute, normalize, and canonicalize the existing prefix.
pub fn resolve(path: &str) -> Result<PathBuf, PathValidationError> {
    let expanded = PathBuf::from(expand_tilde(path));

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|e| PathValidationError::ResolveFailed {
                path: path.into(),
                reason: e.to_string(),
            })?
            .join(expanded)
    };

    let normalized = normalize(&absolute);
    canonicalize_existing_prefix(&normalized).map_err(|e| PathValidationError::ResolveFailed {
        path: path.into(),
        reason: e.to_string(),
    })
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest ancestor that exists and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                existing.pop();
            }
            None => return Ok(path.to_path_buf()),
        }
    }

    let mut canonical = strip_verbatim(existing.canonicalize()?);
    for name in rest.into_iter().rev() {
        canonical.push(name);
    }
    Ok(canonical)
}

/// Drop the Windows extended-length prefix (`\\?\`) that canonicalize adds.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let s = path.to_string_lossy();
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            return PathBuf::from(stripped);
        }
    }
    path
}

fn is_within(path: &Path, root: &Path) -> bool {
    #[cfg(target_os = "windows")]
    {
        let p = path.to_string_lossy().to_lowercase();
        let r = root.to_string_lossy().to_lowercase();
        Path::new(&p).starts_with(Path::new(&r))
    }
    #[cfg(not(target_os = "windows"))]
    {
        path.starts_with(root)
    }
}
