//! Package integrity layer behind the `gpkg` CLI.
//!
//! Content-addressed verification of installed plugin directories: a
//! canonical SHA-256 per plugin, a deterministic TOML lockfile, curated
//! pack bundles, and the install/update/remove/build plumbing. The lockfile
//! is process-wide filesystem state, so every mutation runs under an
//! advisory lock-file guard.

use std::path::PathBuf;

use thiserror::Error;

pub mod hash;
pub mod install;
pub mod lockfile;
pub mod pack;

pub use hash::hash_plugin_dir;
pub use install::{LockGuard, build_plugin, install_plugin, list_installed, remove_plugin};
pub use lockfile::{LockEntry, Lockfile, VerifyReport, VerifyStatus, verify};
pub use pack::{Pack, PackEntry};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("{path}: {detail}")]
    Io { path: String, detail: String },
    #[error("invalid lockfile: {detail}")]
    InvalidLockfile { detail: String },
    #[error("invalid pack file: {detail}")]
    InvalidPack { detail: String },
    #[error("plugin {id:?} is not installed")]
    NotInstalled { id: String },
    #[error("plugin {id}: hash mismatch (locked {expected}, computed {actual})")]
    HashMismatch {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("lockfile is held by another process ({path})")]
    LockHeld { path: String },
    #[error("HOME is not set; cannot locate grim directories")]
    MissingHome,
    #[error("fetch failed for {source_id}: {detail}")]
    Fetch { source_id: String, detail: String },
    #[error("build failed: {detail}")]
    Build { detail: String },
    #[error("manifest: {detail}")]
    Manifest { detail: String },
}

impl PackageError {
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            detail: err.to_string(),
        }
    }
}

/// Plugin install root: `$XDG_DATA_HOME/grim/plugins`, defaulting to
/// `~/.local/share/grim/plugins`. Missing `HOME` is fatal.
pub fn plugins_dir() -> Result<PathBuf, PackageError> {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("grim").join("plugins"));
        }
    }
    let home = home_dir()?;
    Ok(home.join(".local").join("share").join("grim").join("plugins"))
}

/// Lockfile location: `$XDG_CONFIG_HOME/grim/grim.lock`, defaulting to
/// `~/.config/grim/grim.lock`.
pub fn lockfile_path() -> Result<PathBuf, PackageError> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("grim").join("grim.lock"));
        }
    }
    let home = home_dir()?;
    Ok(home.join(".config").join("grim").join("grim.lock"))
}

fn home_dir() -> Result<PathBuf, PackageError> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    dirs::home_dir().ok_or(PackageError::MissingHome)
}
