//! Configuration module for the cleanup service.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [database]
//! type = "sqlite"
//! path = "${DATA_DIR}/index.db"
//!
//! [cleanup]
//! batch_size = 100
//! max_retries = 5
//! ```

mod cleanup;
mod database;
mod observability;
mod storage;

use std::path::Path;

pub use cleanup::*;
pub use database::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use storage::*;

/// Root configuration for the cleanup service.
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupServiceConfig {
    /// Index store holding live and pending-deletion records.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Metadata and file blob stores.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scheduling and reconciliation policy.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl CleanupServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: CleanupServiceConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.storage.validate().map_err(ConfigError::Validation)?;
        self.cleanup.validate()?;

        if self.database.is_memory() && self.cleanup.enabled {
            tracing::warn!(
                "Cleanup worker is enabled with an in-memory index; \
                 pending deletions will not survive a restart"
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR_NAME}` references from the environment.
///
/// References inside a TOML comment are left as written. A `#` inside a
/// quoted string does not start a comment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {}", e)))?;

    let mut expanded = Vec::new();
    for line in input.split('\n') {
        let code_end = comment_start(line).unwrap_or(line.len());
        let (code, comment) = line.split_at(code_end);

        let mut missing = None;
        let code = re.replace_all(code, |cap: &regex::Captures<'_>| {
            std::env::var(&cap[1]).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            })
        });
        if let Some(name) = missing {
            return Err(ConfigError::EnvVarNotFound(name));
        }
        expanded.push(format!("{code}{comment}"));
    }

    Ok(expanded.join("\n"))
}

/// Byte offset of the `#` opening a TOML comment on `line`, if any.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        match quote {
            // Basic strings honour backslash escapes; literal strings do not.
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return Some(i),
            None => {}
        }
    }
    None
}
