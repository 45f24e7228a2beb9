//! Editor-core configuration loading and parsing.
//!
//! Parses `grim.toml`, looked up in the working directory first and then
//! the platform config directory (`$XDG_CONFIG_HOME/grim/grim.toml`).
//! Covers the knobs the core runtime owns: undo history sizing and
//! coalescing, plugin roots and the event-callback budget, and the default
//! sandbox limits applied when a manifest omits its permission block.
//! Unknown fields are ignored (TOML deserialization tolerance) to allow
//! forward evolution without immediate warnings.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct UndoConfig {
    #[serde(default = "UndoConfig::default_depth")]
    pub depth: usize,
    #[serde(default = "UndoConfig::default_coalesce_ms")]
    pub coalesce_ms: u64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            depth: Self::default_depth(),
            coalesce_ms: Self::default_coalesce_ms(),
        }
    }
}

impl UndoConfig {
    const fn default_depth() -> usize {
        1000
    }
    const fn default_coalesce_ms() -> u64 {
        250
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PluginsConfig {
    /// Extra plugin root directories scanned in addition to the data dir.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Per-callback wall budget before a subscriber is reported slow.
    #[serde(default = "PluginsConfig::default_callback_budget_ms")]
    pub callback_budget_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            callback_budget_ms: Self::default_callback_budget_ms(),
        }
    }
}

impl PluginsConfig {
    const fn default_callback_budget_ms() -> u64 {
        50
    }
}

/// Sandbox defaults for manifests that omit limits.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxDefaults {
    #[serde(default = "SandboxDefaults::default_wall_time_ms")]
    pub max_wall_time_ms: u64,
    #[serde(default = "SandboxDefaults::default_memory_bytes")]
    pub max_memory_bytes: usize,
    #[serde(default = "SandboxDefaults::default_file_operations")]
    pub max_file_operations: u32,
    #[serde(default = "SandboxDefaults::default_network_requests")]
    pub max_network_requests: u32,
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        Self {
            max_wall_time_ms: Self::default_wall_time_ms(),
            max_memory_bytes: Self::default_memory_bytes(),
            max_file_operations: Self::default_file_operations(),
            max_network_requests: Self::default_network_requests(),
        }
    }
}

impl SandboxDefaults {
    const fn default_wall_time_ms() -> u64 {
        5_000
    }
    const fn default_memory_bytes() -> usize {
        50 * 1024 * 1024
    }
    const fn default_file_operations() -> u32 {
        100
    }
    const fn default_network_requests() -> u32 {
        50
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub undo: UndoConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub sandbox: SandboxDefaults,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path following platform conventions (XDG first).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("grim.toml");
    if local.exists() {
        return local;
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("grim").join("grim.toml");
        }
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("grim").join("grim.toml");
    }
    PathBuf::from("grim.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config loaded");
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(err) => Err(anyhow::anyhow!(
                "failed to parse {}: {err}",
                path.display()
            )),
        }
    } else {
        // Absent config is the common case; run on defaults.
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_absent() {
        let config = load_from(Some(PathBuf::from("/nonexistent/grim.toml"))).unwrap();
        assert_eq!(config.file.undo.depth, 1000);
        assert_eq!(config.file.undo.coalesce_ms, 250);
        assert_eq!(config.file.plugins.callback_budget_ms, 50);
        assert_eq!(config.file.sandbox.max_wall_time_ms, 5_000);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grim.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[undo]\ndepth = 64\n\n[plugins]\nroots = [\"/opt/grim/plugins\"]\n"
        )
        .unwrap();
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.file.undo.depth, 64);
        assert_eq!(config.file.undo.coalesce_ms, 250);
        assert_eq!(config.file.plugins.roots.len(), 1);
    }

    #[test]
    fn unknown_fields_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grim.toml");
        std::fs::write(&path, "[future_section]\nknob = true\n").unwrap();
        assert!(load_from(Some(path)).is_ok());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grim.toml");
        std::fs::write(&path, "[undo\ndepth = ").unwrap();
        assert!(load_from(Some(path)).is_err());
    }
}
