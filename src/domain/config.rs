//! Application configuration.
//!
//! Loaded from `config.toml` in the data directory; every section has
//! defaults so a missing or partial file still yields a usable config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What removing a branch does to the memories attached to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchRemovalPolicy {
    /// Refuse to remove a branch that still holds fruits.
    #[default]
    Reject,
    /// Remove the branch together with its fruits.
    Cascade,
}

impl BranchRemovalPolicy {
    #[must_use]
    pub const fn cascades(self) -> bool {
        matches!(self, Self::Cascade)
    }
}

/// Tree store behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub branch_removal: BranchRemovalPolicy,
}

/// Local backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Artificial latency added to every backend call, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub tree: TreeConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".alma-tree")
    }

    /// Get the local backend database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("alma.db")
    }

    #[must_use]
    pub const fn latency(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.remote.latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tree.branch_removal, BranchRemovalPolicy::Reject);
        assert_eq!(config.remote.latency_ms, 0);
        assert!(config.database_path().ends_with("alma.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[tree]\nbranch_removal = \"cascade\"\n").unwrap();
        assert!(config.tree.branch_removal.cascades());
        assert_eq!(config.remote.latency_ms, 0);
    }

    #[test]
    fn test_custom_data_dir() {
        let config: AppConfig = toml::from_str("[paths]\ndata_dir = \"/tmp/alma\"\n").unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/alma/alma.db"));
    }
}
