//! Plugin manifest (`plugin.toml` at the plugin root).
//!
//! Identity, entry point, dependency ids, and the permission block the
//! sandbox is sized from. Unknown fields are tolerated so manifests can
//! grow without breaking older hosts.

use std::path::Path;

use core_script::SandboxConfig;
use core_script::sandbox::{
    DEFAULT_MAX_FILE_OPERATIONS, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_MAX_NETWORK_REQUESTS,
    DEFAULT_MAX_WALL_TIME_MS,
};
use serde::{Deserialize, Serialize};

use crate::PluginError;

pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub entry_point: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permissions {
    #[serde(default)]
    pub filesystem: bool,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub system_calls: bool,
    #[serde(default)]
    pub process: bool,
    #[serde(default = "Permissions::default_memory")]
    pub max_memory_bytes: usize,
    #[serde(default = "Permissions::default_wall_time")]
    pub max_wall_time_ms: u64,
    #[serde(default = "Permissions::default_file_ops")]
    pub max_file_operations: u32,
    #[serde(default = "Permissions::default_network_requests")]
    pub max_network_requests: u32,
    #[serde(default)]
    pub allowed_file_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_file_patterns: Vec<String>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            filesystem: false,
            network: false,
            system_calls: false,
            process: false,
            max_memory_bytes: Self::default_memory(),
            max_wall_time_ms: Self::default_wall_time(),
            max_file_operations: Self::default_file_ops(),
            max_network_requests: Self::default_network_requests(),
            allowed_file_patterns: Vec::new(),
            blocked_file_patterns: Vec::new(),
        }
    }
}

impl Permissions {
    const fn default_memory() -> usize {
        DEFAULT_MAX_MEMORY_BYTES
    }
    const fn default_wall_time() -> u64 {
        DEFAULT_MAX_WALL_TIME_MS
    }
    const fn default_file_ops() -> u32 {
        DEFAULT_MAX_FILE_OPERATIONS
    }
    const fn default_network_requests() -> u32 {
        DEFAULT_MAX_NETWORK_REQUESTS
    }
}

/// How a plugin's entry point executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Script,
    Native,
}

impl PluginManifest {
    /// Parse and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|err| PluginError::InvalidManifest {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?;
        let manifest: PluginManifest =
            toml::from_str(&content).map_err(|err| PluginError::InvalidManifest {
                path: path.display().to_string(),
                detail: err.to_string(),
            })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), PluginError> {
        if !valid_id(&self.id) {
            return Err(PluginError::InvalidId {
                id: self.id.clone(),
            });
        }
        if let Err(err) = semver::Version::parse(&self.version) {
            return Err(PluginError::InvalidVersion {
                id: self.id.clone(),
                version: self.version.clone(),
                detail: err.to_string(),
            });
        }
        if self.entry_point.is_empty() {
            return Err(PluginError::InvalidManifest {
                path: path.display().to_string(),
                detail: "entry_point must not be empty".to_string(),
            });
        }
        for dep in &self.dependencies {
            if !valid_id(dep) {
                return Err(PluginError::InvalidId { id: dep.clone() });
            }
        }
        if let Err(detail) = self.sandbox_config().validate() {
            return Err(PluginError::InvalidManifest {
                path: path.display().to_string(),
                detail,
            });
        }
        Ok(())
    }

    /// Entry-point extension decides the execution kind.
    pub fn kind(&self) -> Result<PluginKind, PluginError> {
        let ext = Path::new(&self.entry_point)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext {
            "gza" | "ghost" => Ok(PluginKind::Script),
            "so" | "dylib" | "dll" => Ok(PluginKind::Native),
            other => Err(PluginError::InvalidManifest {
                path: self.entry_point.clone(),
                detail: format!("unrecognized entry point extension {other:?}"),
            }),
        }
    }

    /// Sandbox limits for this plugin's script host.
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            max_wall_time_ms: self.permissions.max_wall_time_ms,
            max_memory_bytes: self.permissions.max_memory_bytes,
            max_file_operations: self.permissions.max_file_operations,
            max_network_requests: self.permissions.max_network_requests,
            enable_filesystem_access: self.permissions.filesystem,
            enable_network_access: self.permissions.network,
            enable_system_calls: self.permissions.system_calls,
            allowed_file_patterns: self.permissions.allowed_file_patterns.clone(),
            blocked_file_patterns: self.permissions.blocked_file_patterns.clone(),
        }
    }
}

/// Lowercase-dashed: `[a-z0-9-]+`, no leading/trailing dash.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && !id.ends_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join(MANIFEST_FILE);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn full_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
id = "git-signs"
name = "Git Signs"
version = "0.2.1"
author = "ghost"
description = "gutter markers"
entry_point = "init.gza"
dependencies = ["fuzzy-find"]

[permissions]
filesystem = true
max_file_operations = 16
"#,
        );
        let manifest = PluginManifest::load(&path).unwrap();
        assert_eq!(manifest.id, "git-signs");
        assert_eq!(manifest.kind().unwrap(), PluginKind::Script);
        let sandbox = manifest.sandbox_config();
        assert!(sandbox.enable_filesystem_access);
        assert!(!sandbox.enable_network_access);
        assert_eq!(sandbox.max_file_operations, 16);
        assert_eq!(sandbox.max_wall_time_ms, 5_000);
    }

    #[test]
    fn uppercase_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            "id = \"GitSigns\"\nname = \"x\"\nversion = \"1.0.0\"\nentry_point = \"a.gza\"\n",
        );
        assert!(matches!(
            PluginManifest::load(&path),
            Err(PluginError::InvalidId { .. })
        ));
    }

    #[test]
    fn bad_semver_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            "id = \"a\"\nname = \"x\"\nversion = \"one\"\nentry_point = \"a.gza\"\n",
        );
        assert!(matches!(
            PluginManifest::load(&path),
            Err(PluginError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn native_kind_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            "id = \"fast\"\nname = \"x\"\nversion = \"1.0.0\"\nentry_point = \"libfast.so\"\n",
        );
        assert_eq!(
            PluginManifest::load(&path).unwrap().kind().unwrap(),
            PluginKind::Native
        );
    }

    #[test]
    fn glob_patterns_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
id = "a"
name = "x"
version = "1.0.0"
entry_point = "a.gza"

[permissions]
allowed_file_patterns = ["/home/?user/*"]
"#,
        );
        assert!(matches!(
            PluginManifest::load(&path),
            Err(PluginError::InvalidManifest { .. })
        ));
    }
}
