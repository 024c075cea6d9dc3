use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Index store configuration.
///
/// The index holds the live instance records and the pending-deletion
/// records with their retry ledgers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DatabaseConfig {
    /// Process-local index. Pending deletions do not survive a restart.
    #[default]
    Memory,

    /// SQLite database. Good for single-node deployments.
    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteConfig),
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        matches!(self, DatabaseConfig::Memory)
    }

    /// Whether migrations should run at startup.
    pub fn run_migrations(&self) -> bool {
        match self {
            DatabaseConfig::Memory => false,
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) => c.run_migrations,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DatabaseConfig::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) => c.validate(),
        }
    }
}

/// SQLite configuration.
#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    pub path: String,

    /// Create the database file if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Run migrations on startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Maximum number of connections in the pool.
    /// A cleanup pass pins one connection for its duration, so at least two are required.
    #[serde(default = "default_sqlite_max_connections")]
    pub max_connections: u32,
}

#[cfg(feature = "database-sqlite")]
impl SqliteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "SQLite path cannot be empty".into(),
            ));
        }
        if self.path == ":memory:" {
            return Err(ConfigError::Validation(
                "SQLite in-memory databases are per-connection; use database.type = \"memory\""
                    .into(),
            ));
        }
        if self.max_connections < 2 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "database-sqlite")]
fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

#[cfg(feature = "database-sqlite")]
fn default_sqlite_max_connections() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        assert!(DatabaseConfig::default().is_memory());
        assert!(!DatabaseConfig::default().run_migrations());
    }

    #[test]
    fn test_parse_memory() {
        let config: DatabaseConfig = toml::from_str(r#"type = "memory""#).unwrap();
        assert!(config.is_memory());
    }

    #[cfg(feature = "database-sqlite")]
    #[test]
    fn test_parse_sqlite_defaults() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            type = "sqlite"
            path = "/tmp/index.db"
        "#,
        )
        .unwrap();
        match config {
            DatabaseConfig::Sqlite(c) => {
                assert_eq!(c.path, "/tmp/index.db");
                assert!(c.create_if_missing);
                assert!(c.wal_mode);
                assert_eq!(c.busy_timeout_ms, 5000);
                assert_eq!(c.max_connections, 5);
            }
            other => panic!("expected sqlite, got {other:?}"),
        }
    }

    #[cfg(feature = "database-sqlite")]
    #[test]
    fn test_sqlite_validation() {
        let parse = |extra: &str| -> DatabaseConfig {
            toml::from_str(&format!("type = \"sqlite\"\n{extra}")).unwrap()
        };
        assert!(parse("path = \"\"").validate().is_err());
        assert!(parse("path = \":memory:\"").validate().is_err());
        assert!(
            parse("path = \"a.db\"\nmax_connections = 1")
                .validate()
                .is_err()
        );
        assert!(parse("path = \"a.db\"").validate().is_ok());
    }
}
