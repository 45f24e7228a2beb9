//! Install/update/remove/build plumbing plus the advisory lockfile guard.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::pack::Pack;
use crate::{PackageError, lockfile};
use core_plugin::manifest::{MANIFEST_FILE, PluginManifest};

/// Advisory lock on the lockfile path, held for the duration of a mutation.
/// Implemented as a sibling `.lock` file created with `create_new`; a
/// leftover lock older than the stale window is reclaimed.
pub struct LockGuard {
    path: PathBuf,
}

const STALE_LOCK_AFTER: Duration = Duration::from_secs(300);

impl LockGuard {
    pub fn acquire(lockfile_path: &Path) -> Result<Self, PackageError> {
        let path = lock_path(lockfile_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PackageError::io(parent, err))?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(&path) {
                    warn!(target: "package", path = %path.display(), "reclaiming stale lock");
                    let _ = std::fs::remove_file(&path);
                    return Self::acquire(lockfile_path);
                }
                Err(PackageError::LockHeld {
                    path: path.display().to_string(),
                })
            }
            Err(err) => Err(PackageError::io(&path, err)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path(lockfile_path: &Path) -> PathBuf {
    let mut name = lockfile_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "grim.lock".to_string());
    name.push_str(".lock");
    lockfile_path.with_file_name(name)
}

fn lock_is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}

/// Installed plugin ids (directories carrying a manifest), sorted.
pub fn list_installed(plugins_dir: &Path) -> Result<Vec<String>, PackageError> {
    let mut ids = Vec::new();
    let entries = match std::fs::read_dir(plugins_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(err) => return Err(PackageError::io(plugins_dir, err)),
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Install one plugin from `source` (local directory or git URL) into
/// `plugins_dir`. Fetch and build land in a staging directory that is
/// promoted with a rename only on success, so a failed install never
/// leaves a half-written plugin. Returns the installed plugin id.
pub fn install_plugin(plugins_dir: &Path, source: &str) -> Result<String, PackageError> {
    std::fs::create_dir_all(plugins_dir).map_err(|err| PackageError::io(plugins_dir, err))?;
    let staging = plugins_dir.join(format!(".staging-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&staging);
    let outcome = install_into_staging(plugins_dir, source, &staging);
    if outcome.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    outcome
}

fn install_into_staging(
    plugins_dir: &Path,
    source: &str,
    staging: &Path,
) -> Result<String, PackageError> {
    let source_path = Path::new(source);
    if source_path.is_dir() {
        copy_dir(source_path, staging)?;
    } else if looks_like_git(source) {
        clone(source, staging)?;
    } else {
        return Err(PackageError::Fetch {
            source_id: source.to_string(),
            detail: "source is neither a directory nor a git URL".to_string(),
        });
    }

    let manifest =
        PluginManifest::load(&staging.join(MANIFEST_FILE)).map_err(|err| PackageError::Manifest {
            detail: err.to_string(),
        })?;
    let id = manifest.id.clone();

    build_plugin(staging)?;

    let target = plugins_dir.join(&id);
    if target.exists() {
        std::fs::remove_dir_all(&target).map_err(|err| PackageError::io(&target, err))?;
    }
    std::fs::rename(staging, &target).map_err(|err| PackageError::io(&target, err))?;
    info!(target: "package", id = %id, source, "plugin installed");
    Ok(id)
}

/// Install every enabled entry of a pack, in name order, through the
/// single-plugin path. Failures are collected per entry.
pub fn install_pack(
    plugins_dir: &Path,
    pack: &Pack,
) -> Vec<(String, Result<String, PackageError>)> {
    pack.enabled_entries()
        .map(|(name, entry)| {
            (
                name.to_string(),
                install_plugin(plugins_dir, &entry.source),
            )
        })
        .collect()
}

/// Re-install every installed plugin from its recorded lockfile source.
pub fn update_all(
    plugins_dir: &Path,
    lockfile: &lockfile::Lockfile,
) -> Vec<(String, Result<String, PackageError>)> {
    lockfile
        .plugins
        .iter()
        .map(|(id, entry)| (id.clone(), install_plugin(plugins_dir, &entry.source)))
        .collect()
}

pub fn remove_plugin(plugins_dir: &Path, id: &str) -> Result<(), PackageError> {
    let dir = plugins_dir.join(id);
    if !dir.is_dir() {
        return Err(PackageError::NotInstalled { id: id.to_string() });
    }
    std::fs::remove_dir_all(&dir).map_err(|err| PackageError::io(&dir, err))?;
    info!(target: "package", id, "plugin removed");
    Ok(())
}

/// Detected build system of a plugin directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Zig,
    Cargo,
    Make,
}

impl BuildSystem {
    pub fn detect(dir: &Path) -> Option<Self> {
        if dir.join("build.zig").is_file() {
            Some(Self::Zig)
        } else if dir.join("Cargo.toml").is_file() {
            Some(Self::Cargo)
        } else if dir.join("Makefile").is_file() {
            Some(Self::Make)
        } else {
            None
        }
    }

    fn command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Zig => ("zig", &["build", "-Doptimize=ReleaseSafe"]),
            Self::Cargo => ("cargo", &["build", "--release"]),
            Self::Make => ("make", &[]),
        }
    }
}

/// Run the plugin's build step if it declares one. Script-only plugins
/// (no build file) are a successful no-op.
pub fn build_plugin(dir: &Path) -> Result<Option<BuildSystem>, PackageError> {
    let Some(system) = BuildSystem::detect(dir) else {
        debug!(target: "package", dir = %dir.display(), "no build step");
        return Ok(None);
    };
    let (program, args) = system.command();
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|err| PackageError::Build {
            detail: format!("failed to run {program}: {err}"),
        })?;
    if !output.status.success() {
        return Err(PackageError::Build {
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!(target: "package", dir = %dir.display(), ?system, "build succeeded");
    Ok(Some(system))
}

/// Artifacts `info` reports: the entry point plus any built libraries.
pub fn detect_artifacts(dir: &Path) -> Vec<String> {
    let mut artifacts = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            let name = child
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if name.starts_with('.') {
                continue;
            }
            if child.is_dir() {
                stack.push(child);
            } else if matches!(
                child.extension().and_then(|e| e.to_str()),
                Some("gza" | "ghost" | "so" | "dylib" | "dll")
            ) {
                if let Ok(rel) = child.strip_prefix(dir) {
                    artifacts.push(rel.to_string_lossy().into_owned());
                }
            }
        }
    }
    artifacts.sort();
    artifacts
}

fn looks_like_git(source: &str) -> bool {
    source.ends_with(".git")
        || source.starts_with("https://")
        || source.starts_with("http://")
        || source.starts_with("git@")
        || source.starts_with("git://")
}

fn clone(source: &str, target: &Path) -> Result<(), PackageError> {
    let output = Command::new("git")
        .args(["clone", "--depth", "1", source])
        .arg(target)
        .output()
        .map_err(|err| PackageError::Fetch {
            source_id: source.to_string(),
            detail: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(PackageError::Fetch {
            source_id: source.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    // The clone's history is irrelevant to hashing (hidden ".git" is
    // skipped), but dropping it keeps installs small.
    let _ = std::fs::remove_dir_all(target.join(".git"));
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), PackageError> {
    std::fs::create_dir_all(to).map_err(|err| PackageError::io(to, err))?;
    let entries = std::fs::read_dir(from).map_err(|err| PackageError::io(from, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| PackageError::io(from, err))?;
        let target = to.join(entry.file_name());
        let path = entry.path();
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else if path.is_file() {
            std::fs::copy(&path, &target).map_err(|err| PackageError::io(&path, err))?;
        }
    }
    Ok(())
}
