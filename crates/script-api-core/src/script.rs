// script-api-core/src/script.rs
// ============================================================================
// Module: Script Registry
// Description: Directory scan and safe path resolution under a scripts root.
// Purpose: Resolve user-supplied script identities to absolute paths without
//          allowing escape from the configured root.
// Dependencies: std::fs, thiserror
// ============================================================================

//! ## Overview
//! The registry is the only gate between user-supplied path strings and
//! `exec`. `scan` discovers scripts; `resolve` turns a requested path into a
//! canonical, validated absolute path.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// File extension recognized by the registry's scan and resolve operations.
pub const SCRIPT_EXTENSION: &str = "py";

const IGNORED_DIR_NAMES: &[&str] = &["__pycache__", ".git", ".venv", "venv", "env", "node_modules"];

/// A discovered script under the scripts root.
///
/// # Invariants
/// - Identity is `path`; produced by a scan and replaced wholesale by a rescan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptInfo {
    /// POSIX-style path relative to the scripts root.
    pub path: String,
    /// Absolute, canonicalized path on disk.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Modification time, seconds since the Unix epoch (fractional).
    pub mtime: f64,
}

/// Errors raised while scanning or resolving scripts.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested path escapes the scripts root.
    #[error("script path must be under scripts root")]
    NotUnderRoot,
    /// The requested path does not have the recognized script extension.
    #[error("script path must point to a .{SCRIPT_EXTENSION} file")]
    WrongExtension,
    /// The requested path does not exist or is not a regular file.
    #[error("script not found: {0}")]
    NotFound(String),
    /// An I/O error occurred while scanning or resolving.
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recursively scans `root` for runnable scripts, sorted by relative path.
///
/// Excludes any path with a segment named `__pycache__`, `.git`, `.venv`,
/// `venv`, `env`, `node_modules`, or starting with `.`, as well as files
/// whose basename starts with `_`. Returns an empty list if `root` does not
/// exist or is not a directory.
#[must_use]
pub fn scan_scripts(root: &Path) -> Vec<ScriptInfo> {
    let Ok(resolved_root) = fs::canonicalize(root) else {
        return Vec::new();
    };
    if !resolved_root.is_dir() {
        return Vec::new();
    }

    let mut scripts = Vec::new();
    walk(&resolved_root, &resolved_root, &mut scripts);
    scripts.sort_by(|a, b| a.path.cmp(&b.path));
    scripts
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<ScriptInfo>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || IGNORED_DIR_NAMES.contains(&name) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk(root, &path, out);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if name.starts_with('_') {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(relative_str) = relative.to_str() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());
        out.push(ScriptInfo {
            path: relative_str.replace('\\', "/"),
            absolute_path: path,
            size_bytes: metadata.len(),
            mtime,
        });
    }
}

/// Resolves a requested script path to an absolute path under `root`.
///
/// # Errors
///
/// Returns [`RegistryError::NotUnderRoot`] if the resolved path escapes
/// `root` (via `..`, an absolute path, or a symlink), [`RegistryError::WrongExtension`]
/// if it does not end in `.py`, and [`RegistryError::NotFound`] if it does not
/// exist or is not a regular file.
pub fn resolve_script(root: &Path, requested: &str) -> Result<PathBuf, RegistryError> {
    let resolved_root = fs::canonicalize(root)?;
    let candidate = resolved_root.join(requested);

    let canonical = fs::canonicalize(&candidate).map_err(|_| RegistryError::NotFound(requested.to_string()))?;

    if !canonical.starts_with(&resolved_root) {
        return Err(RegistryError::NotUnderRoot);
    }
    if canonical.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
        return Err(RegistryError::WrongExtension);
    }
    if !canonical.is_file() {
        return Err(RegistryError::NotFound(requested.to_string()));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn scan_sorts_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("hello.py"), "print('hi')");
        write(&dir.path().join("args_env.py"), "print('hi')");
        write(&dir.path().join("_private.py"), "print('hi')");
        write(&dir.path().join(".venv/bad.py"), "print('hi')");
        write(&dir.path().join("__pycache__/bad.py"), "print('hi')");

        let found = scan_scripts(dir.path());
        let paths: Vec<_> = found.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["args_env.py", "hello.py"]);
    }

    #[test]
    fn scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("b.py"), "1");
        write(&dir.path().join("a.py"), "1");
        let first = scan_scripts(dir.path());
        let second = scan_scripts(dir.path());
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("hello.py"), "1");
        let err = resolve_script(dir.path(), "../escape.py").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_) | RegistryError::NotUnderRoot));
    }

    #[test]
    fn resolve_rejects_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("hello.txt"), "1");
        let err = resolve_script(dir.path(), "hello.txt").unwrap_err();
        assert!(matches!(err, RegistryError::WrongExtension));
    }

    #[test]
    fn resolve_rejects_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_script(dir.path(), "missing.py").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn resolve_accepts_valid_script() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("hello.py"), "1");
        let resolved = resolve_script(dir.path(), "hello.py").unwrap();
        assert!(resolved.starts_with(fs::canonicalize(dir.path()).unwrap()));
    }
}
