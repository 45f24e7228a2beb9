//! Canonical content hashing of a plugin directory.
//!
//! The serialization is fixed: enumerate regular files recursively, skip
//! hidden entries and build-output directories, sort by root-relative path
//! (`/`-separated, lexicographic), and feed
//! `relative_path || 0x00 || file_bytes || 0x00` per file into SHA-256.
//! The digest renders as 64 lowercase hex characters. Any byte change in a
//! non-ignored file changes the hash; renames change it too, since the
//! relative path is part of the input.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::PackageError;

/// Build-output directory names excluded from hashing.
pub const IGNORED_DIRS: &[&str] = &["zig-out", "zig-cache", "target", "node_modules", "build"];

pub fn hash_plugin_dir(root: &Path) -> Result<String, PackageError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel, abs) in &files {
        let bytes = std::fs::read(abs).map_err(|err| PackageError::io(abs, err))?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    trace!(target: "package", root = %root.display(), files = files.len(), %digest, "hashed plugin dir");
    Ok(digest)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), PackageError> {
    let entries = std::fs::read_dir(dir).map_err(|err| PackageError::io(dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| PackageError::io(dir, err))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|err| PackageError::io(&path, err))?;
        if file_type.is_dir() {
            if IGNORED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|err| PackageError::Io {
                    path: path.display().to_string(),
                    detail: err.to_string(),
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, path));
        }
        // Symlinks and other special files are neither followed nor hashed.
    }
    Ok(())
}
