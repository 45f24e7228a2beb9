//! Pack bundles: a curated set of plugin references installed as a unit.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::PackageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub plugins: BTreeMap<String, PackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "PackEntry::default_enabled")]
    pub enabled: bool,
}

impl PackEntry {
    const fn default_enabled() -> bool {
        true
    }
}

impl Pack {
    pub fn load(path: &Path) -> Result<Self, PackageError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| PackageError::io(path, err))?;
        toml::from_str(&content).map_err(|err| PackageError::InvalidPack {
            detail: err.to_string(),
        })
    }

    /// Enabled entries in lexicographic name order; the iteration order of
    /// a pack install.
    pub fn enabled_entries(&self) -> impl Iterator<Item = (&str, &PackEntry)> {
        self.plugins
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, entry)| (name.as_str(), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("essentials.pack.toml");
        std::fs::write(
            &path,
            r#"
name = "essentials"
version = "1.0.0"
description = "starter set"
author = "ghost"

[plugins.zeta-theme]
source = "https://example.com/zeta-theme.git"

[plugins.alpha-git]
source = "https://example.com/alpha-git.git"
version = "2.0.0"

[plugins.disabled-one]
source = "https://example.com/disabled.git"
enabled = false
"#,
        )
        .unwrap();
        let pack = Pack::load(&path).unwrap();
        assert_eq!(pack.name, "essentials");
        let names: Vec<&str> = pack.enabled_entries().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha-git", "zeta-theme"]);
        assert_eq!(
            pack.plugins["alpha-git"].version.as_deref(),
            Some("2.0.0")
        );
        assert!(!pack.plugins["disabled-one"].enabled);
    }

    #[test]
    fn malformed_pack_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "name = [1,2]\n").unwrap();
        assert!(matches!(
            Pack::load(&path),
            Err(PackageError::InvalidPack { .. })
        ));
    }
}
