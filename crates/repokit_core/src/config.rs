//! Store and logging configuration.
//!
//! # Responsibility
//! - Describe where the store lives and how connections are opened.
//! - Load settings from JSON and apply `REPOKIT_*` environment overrides.
//!
//! # Invariants
//! - Every field has a default, so an empty JSON object is a valid config.
//! - Overrides are applied after file values.

use crate::db::ConnectionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_DATABASE_PATH: &str = "REPOKIT_DATABASE_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "REPOKIT_BUSY_TIMEOUT_MS";
pub const ENV_SCHEMA_MODE: &str = "REPOKIT_SCHEMA_MODE";
pub const ENV_LOG_LEVEL: &str = "REPOKIT_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "REPOKIT_LOG_DIR";

const DEFAULT_DATABASE_PATH: &str = "repokit.sqlite3";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value `{value}` for {key}")]
    InvalidOverride { key: &'static str, value: String },
}

/// How a session factory treats the live schema at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Create missing tables from the model.
    #[default]
    Create,
    /// Only check that tables and column types match the model.
    Verify,
}

impl SchemaMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// File log directory; `None` keeps logging uninitialized.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
    pub schema_mode: SchemaMode,
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            schema_mode: SchemaMode::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Defaults with the given database path.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `REPOKIT_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`; unset keys keep their value.
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidOverride {
                        key: ENV_BUSY_TIMEOUT_MS,
                        value: raw.clone(),
                    })?;
        }
        if let Some(raw) = lookup(ENV_SCHEMA_MODE) {
            self.schema_mode = SchemaMode::parse(&raw).ok_or(ConfigError::InvalidOverride {
                key: ENV_SCHEMA_MODE,
                value: raw.clone(),
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(directory) = lookup(ENV_LOG_DIR) {
            self.logging.directory = Some(PathBuf::from(directory));
        }
        Ok(self)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            foreign_keys: self.foreign_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SchemaMode, StoreConfig, ENV_BUSY_TIMEOUT_MS, ENV_SCHEMA_MODE};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn empty_json_yields_defaults() {
        let config = StoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(config.foreign_keys);
    }

    #[test]
    fn json_fields_are_read() {
        let config = StoreConfig::from_json_str(
            r#"{"database_path":"/tmp/shop.db","schema_mode":"verify","logging":{"level":"debug"}}"#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/shop.db"));
        assert_eq!(config.schema_mode, SchemaMode::Verify);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.directory, None);
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("REPOKIT_DATABASE_PATH", "/data/app.db"),
            (ENV_BUSY_TIMEOUT_MS, "250"),
            (ENV_SCHEMA_MODE, "Verify"),
            ("REPOKIT_LOG_DIR", "/var/log/repokit"),
        ]
        .into_iter()
        .collect();

        let config = StoreConfig::default()
            .apply_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/app.db"));
        assert_eq!(config.connection_options().busy_timeout.as_millis(), 250);
        assert_eq!(config.schema_mode, SchemaMode::Verify);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/repokit"))
        );
    }

    #[test]
    fn malformed_override_is_rejected() {
        let err = StoreConfig::default()
            .apply_overrides(|key| (key == ENV_BUSY_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidOverride { key, .. } if key == ENV_BUSY_TIMEOUT_MS
        ));
    }
}
