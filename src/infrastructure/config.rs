//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Alma memory tree configuration
# Auto-generated - edit as needed

[tree]
# What removing a branch does to its memories:
#   "reject"  - refuse while the branch still holds memories (default)
#   "cascade" - remove the memories together with the branch
branch_removal = "reject"

[remote]
# Artificial latency added to every backend call, in milliseconds
latency_ms = 0

[paths]
# Custom data directory (optional, defaults to ~/.alma-tree)
# data_dir = "/custom/path"
"#;

/// Load configuration from the default location, or defaults if absent.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Save configuration to the file [`load_config`] reads.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &config_file_path())
}

/// Save configuration to a specific file.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    fs::write(config_path, content).map_err(|e| {
        AppError::io(format!("Failed to write config file: {}", config_path.display()), e)
    })?;

    tracing::info!(path = %config_path.display(), "Configuration saved");

    Ok(())
}

/// Create default configuration file if it doesn't exist.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<()> {
    let config_path = config_file_path();

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create config directory", e))?;
        }

        fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| AppError::io("Failed to create default config", e))?;

        tracing::info!(path = %config_path.display(), "Created default configuration");
    }

    Ok(())
}

/// Get the path to the configuration file.
///
/// Always under the default data directory: `[paths] data_dir` is read from
/// this file, so it cannot move the file itself.
#[must_use]
pub fn config_file_path() -> std::path::PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BranchRemovalPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.tree.branch_removal, BranchRemovalPolicy::Reject);
        assert_eq!(config.remote.latency_ms, 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().to_path_buf());
        config.tree.branch_removal = BranchRemovalPolicy::Cascade;

        let path = dir.path().join("config.toml");
        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from_file(&path).unwrap();

        assert_eq!(loaded.tree.branch_removal, BranchRemovalPolicy::Cascade);
        assert_eq!(loaded.paths.data_dir, config.paths.data_dir);
    }

    #[test]
    fn test_custom_data_dir_does_not_move_config_file() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().join("data"));

        assert_eq!(config_file_path(), AppConfig::default_data_dir().join("config.toml"));
        assert!(!config_file_path().starts_with(dir.path()));
        assert!(config.database_path().starts_with(dir.path()));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tree]\nbranch_removal = \"orphan\"\n").unwrap();
        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }
}
