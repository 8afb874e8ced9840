//! Request path resolution under the document root.
//!
//! Syntactic checks (dot-dot, NUL) run first, but the real guarantee comes
//! from canonicalizing both the candidate and the root and requiring a
//! prefix match: a symlink inside the root that points outside it is caught
//! even when the request path itself looks clean.

use std::path::{Component, Path, PathBuf};

/// Why a request path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The raw path contains a `..` segment.
    Traversal,
    /// The raw path contains an embedded NUL byte.
    EmbeddedNul,
    /// The canonical result does not live under the canonical root.
    OutsideRoot,
    /// The path (or its parent directory) cannot be canonicalized.
    Unresolvable,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ResolveError::Traversal => "path contains a parent-directory segment",
            ResolveError::EmbeddedNul => "path contains an embedded NUL",
            ResolveError::OutsideRoot => "path escapes the document root",
            ResolveError::Unresolvable => "path cannot be resolved",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ResolveError {}

/// Maps a request path to its canonical location under `root`.
///
/// The returned path is absolute, symlink-resolved, and guaranteed to start
/// with the canonical root followed by a separator or end-of-string. The
/// target file itself need not exist (the caller distinguishes 404 from
/// 403), but its parent directory must.
pub fn resolve(root: &Path, request_path: &str) -> Result<PathBuf, ResolveError> {
    if request_path.contains("..") {
        return Err(ResolveError::Traversal);
    }
    if request_path.contains('\0') {
        return Err(ResolveError::EmbeddedNul);
    }

    let relative = request_path.trim_start_matches('/');
    let candidate = root.join(relative);

    let canonical_root = root
        .canonicalize()
        .map_err(|_| ResolveError::Unresolvable)?;

    let canonical = canonicalize_candidate(&candidate)?;

    if canonical.starts_with(&canonical_root) {
        Ok(canonical)
    } else {
        Err(ResolveError::OutsideRoot)
    }
}

/// Canonicalizes `candidate`, falling back to canonicalizing its parent and
/// re-appending the final component when the candidate itself does not
/// exist yet.
fn canonicalize_candidate(candidate: &Path) -> Result<PathBuf, ResolveError> {
    match candidate.canonicalize() {
        Ok(path) => Ok(path),
        Err(_) => {
            let parent = candidate.parent().ok_or(ResolveError::Unresolvable)?;
            let file_name = match candidate.components().next_back() {
                Some(Component::Normal(name)) => name,
                _ => return Err(ResolveError::Unresolvable),
            };
            let canonical_parent = parent
                .canonicalize()
                .map_err(|_| ResolveError::Unresolvable)?;
            Ok(canonical_parent.join(file_name))
        }
    }
}
