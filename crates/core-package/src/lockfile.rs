//! Lockfile format and verification.
//!
//! `grim.lock` is TOML with a machine-generated comment header. Entries
//! live in a `BTreeMap`, so serialization is canonical: lexicographic id
//! order, deterministic formatting, stable diffs. Timestamps are
//! milliseconds since the Unix epoch.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hash::hash_plugin_dir;
use crate::{PackageError, install};
use core_plugin::manifest::{MANIFEST_FILE, PluginKind, PluginManifest};

pub const LOCKFILE_VERSION: &str = "1";

const HEADER: &str = "# This file is generated by gpkg. Do not edit by hand.\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub version: String,
    #[serde(default)]
    pub plugins: BTreeMap<String, LockEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    /// 64 lowercase hex chars of the canonical directory hash.
    pub hash: String,
    pub source: String,
    /// "script" or "native".
    pub kind: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            version: LOCKFILE_VERSION.to_string(),
            plugins: BTreeMap::new(),
        }
    }
}

impl Lockfile {
    pub fn read(path: &Path) -> Result<Self, PackageError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| PackageError::io(path, err))?;
        let lockfile: Lockfile =
            toml::from_str(&content).map_err(|err| PackageError::InvalidLockfile {
                detail: err.to_string(),
            })?;
        if lockfile.version != LOCKFILE_VERSION {
            return Err(PackageError::InvalidLockfile {
                detail: format!(
                    "unsupported lockfile version {:?} (expected {LOCKFILE_VERSION:?})",
                    lockfile.version
                ),
            });
        }
        Ok(lockfile)
    }

    /// Serialize with the generated-file header. Output is canonical for
    /// the entry set: write-then-read round-trips an equal structure and
    /// equal bytes.
    pub fn write(&self, path: &Path) -> Result<(), PackageError> {
        let body = toml::to_string(self).map_err(|err| PackageError::InvalidLockfile {
            detail: err.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PackageError::io(parent, err))?;
        }
        std::fs::write(path, format!("{HEADER}{body}"))
            .map_err(|err| PackageError::io(path, err))?;
        info!(target: "package", path = %path.display(), plugins = self.plugins.len(), "lockfile written");
        Ok(())
    }

    /// Rebuild the lockfile from the installed tree, preserving recorded
    /// sources where an existing lockfile knows them.
    pub fn from_installed(
        plugins_dir: &Path,
        previous: Option<&Lockfile>,
    ) -> Result<Self, PackageError> {
        let mut lockfile = Lockfile::default();
        for id in install::list_installed(plugins_dir)? {
            let dir = plugins_dir.join(&id);
            let manifest = PluginManifest::load(&dir.join(MANIFEST_FILE)).map_err(|err| {
                PackageError::Manifest {
                    detail: err.to_string(),
                }
            })?;
            let kind = match manifest.kind() {
                Ok(PluginKind::Native) => "native",
                _ => "script",
            };
            let source = previous
                .and_then(|prev| prev.plugins.get(&id))
                .map(|entry| entry.source.clone())
                .unwrap_or_else(|| dir.display().to_string());
            lockfile.plugins.insert(
                id,
                LockEntry {
                    version: manifest.version.clone(),
                    hash: hash_plugin_dir(&dir)?,
                    source,
                    kind: kind.to_string(),
                    dependencies: manifest.dependencies.clone(),
                    updated_at: epoch_ms(),
                },
            );
        }
        Ok(lockfile)
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    NotInstalled,
    HashMismatch { expected: String, actual: String },
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Per-plugin outcome in lockfile (id) order.
    pub results: Vec<(String, VerifyStatus)>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.results
            .iter()
            .all(|(_, status)| *status == VerifyStatus::Ok)
    }
}

/// Check every lock entry against the installed tree. Emits a result for
/// every plugin even when earlier ones fail.
pub fn verify(lockfile_path: &Path, plugins_dir: &Path) -> Result<VerifyReport, PackageError> {
    let lockfile = Lockfile::read(lockfile_path)?;
    let mut report = VerifyReport::default();
    for (id, entry) in &lockfile.plugins {
        let dir = plugins_dir.join(id);
        let status = if !dir.is_dir() {
            VerifyStatus::NotInstalled
        } else {
            let actual = hash_plugin_dir(&dir)?;
            if actual == entry.hash {
                VerifyStatus::Ok
            } else {
                warn!(target: "package", id = %id, expected = %entry.hash, %actual, "hash mismatch");
                VerifyStatus::HashMismatch {
                    expected: entry.hash.clone(),
                    actual,
                }
            }
        };
        report.results.push((id.clone(), status));
    }
    Ok(report)
}
