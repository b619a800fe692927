//! Application configuration for contactlink.
//!
//! User config lives at `~/.contactlink/contactlink.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContactLinkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contactlink.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contactlink";

/// Database file used when `[database].path` is unset.
const DEFAULT_DB_FILE_NAME: &str = "contacts.db";

// ---------------------------------------------------------------------------
// Config structs (matching contactlink.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Contact store settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Which contact store implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded libSQL database file.
    #[default]
    Libsql,
    /// Process-local store; contents are lost on exit.
    Memory,
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file path. Defaults to `~/.contactlink/contacts.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contactlink/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContactLinkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contactlink/contactlink.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContactLinkError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ContactLinkError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContactLinkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| ContactLinkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContactLinkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database file: an explicit override wins, then `[database].path`,
/// then `~/.contactlink/contacts.db`.
pub fn resolve_database_path(config: &AppConfig, override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    match &config.database.path {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(config_dir()?.join(DEFAULT_DB_FILE_NAME)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("backend = \"libsql\""));
    }

    #[test]
    fn config_with_memory_backend() {
        let toml_str = r#"
[database]
backend = "memory"
path = "/tmp/contacts.db"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.database.path.as_deref(), Some("/tmp/contacts.db"));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").expect("parse empty");
        assert_eq!(config.database.backend, StoreBackend::Libsql);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[database]\nbackend = \"postgres\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn database_path_precedence() {
        let mut config = AppConfig::default();
        config.database.path = Some("/var/lib/contactlink/contacts.db".into());

        let flag = PathBuf::from("/tmp/override.db");
        assert_eq!(
            resolve_database_path(&config, Some(&flag)).expect("resolve"),
            flag
        );
        assert_eq!(
            resolve_database_path(&config, None).expect("resolve"),
            PathBuf::from("/var/lib/contactlink/contacts.db")
        );
    }

    #[test]
    fn load_config_from_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("contactlink-does-not-exist.toml");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ContactLinkError::Io { .. }));
    }
}
