//! Storage and flush configuration consumed by the core
//!
//! Loading these from files and environment is the server's job; the core
//! only validates and interprets the resolved values.

use crate::error::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// File name that opens a private in-memory SQLite database
pub const SQLITE_IN_MEMORY: &str = ":memory:";

/// The two interchangeable storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Pooled networked relational backend
    Postgres,
    /// Embedded file-based relational backend
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(TallyError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name, validated by [`StorageConfig::backend`]
    pub kind: String,
    pub postgres: PostgresConfig,
    pub sqlite: SqliteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            postgres: PostgresConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn backend(&self) -> Result<BackendKind> {
        self.kind.parse()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub minimum_idle: u32,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub max_lifetime_ms: u64,
    pub statement_timeout_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "killtally".to_string(),
            user: "killtally".to_string(),
            password: String::new(),
            pool_size: 10,
            minimum_idle: 5,
            idle_timeout_ms: 600_000,
            connection_timeout_ms: 30_000,
            max_lifetime_ms: 1_800_000,
            statement_timeout_ms: 30_000,
        }
    }
}

// Hand-written so the password never ends up in logs
impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .field("minimum_idle", &self.minimum_idle)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("max_lifetime_ms", &self.max_lifetime_ms)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish()
    }
}

impl PostgresConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(TallyError::InvalidConfig(
                "storage.postgres.pool_size must be at least 1".to_string(),
            ));
        }
        if self.minimum_idle > self.pool_size {
            return Err(TallyError::InvalidConfig(format!(
                "storage.postgres.minimum_idle ({}) exceeds pool_size ({})",
                self.minimum_idle, self.pool_size
            )));
        }
        if self.host.is_empty() || self.database.is_empty() {
            return Err(TallyError::InvalidConfig(
                "storage.postgres.host and storage.postgres.database are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, relative paths resolve against the data directory
    pub file: String,
    pub busy_timeout_ms: u64,
    pub connection_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            file: "database.sqlite".to_string(),
            busy_timeout_ms: 30_000,
            connection_timeout_ms: 30_000,
        }
    }
}

impl SqliteConfig {
    /// In-memory configuration, mostly for tests
    pub fn in_memory() -> Self {
        Self {
            file: SQLITE_IN_MEMORY.to_string(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.file == SQLITE_IN_MEMORY
    }

    /// Absolute or data-dir-relative location of the database file
    pub fn resolve_path(&self, data_dir: &Path) -> PathBuf {
        let file = Path::new(&self.file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            data_dir.join(file)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_secs: u64,
    /// Upper bound on the final flush, so shutdown never hangs on storage
    pub shutdown_timeout_secs: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            shutdown_timeout_secs: 10,
        }
    }
}

impl FlushConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(TallyError::InvalidConfig(
                "flush.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!(" SQLite ".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("Postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!(
            "postgresql".parse::<BackendKind>().unwrap(),
            BackendKind::Postgres
        );
    }

    #[test]
    fn test_unknown_backend_is_unsupported() {
        let config = StorageConfig {
            kind: "mongodb".to_string(),
            ..StorageConfig::default()
        };
        match config.backend() {
            Err(TallyError::UnsupportedBackend(name)) => assert_eq!(name, "mongodb"),
            other => panic!("expected UnsupportedBackend, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let pg = PostgresConfig::default();
        assert_eq!(pg.pool_size, 10);
        assert_eq!(pg.minimum_idle, 5);
        assert_eq!(pg.idle_timeout(), Duration::from_secs(600));
        assert_eq!(pg.connection_timeout(), Duration::from_secs(30));
        assert_eq!(pg.max_lifetime(), Duration::from_secs(1800));

        let flush = FlushConfig::default();
        assert_eq!(flush.interval(), Duration::from_secs(5));
        assert!(flush.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let flush = FlushConfig {
            interval_secs: 0,
            ..FlushConfig::default()
        };
        assert!(matches!(flush.validate(), Err(TallyError::InvalidConfig(_))));
    }

    #[test]
    fn test_minimum_idle_above_pool_size_rejected() {
        let pg = PostgresConfig {
            pool_size: 2,
            minimum_idle: 3,
            ..PostgresConfig::default()
        };
        assert!(matches!(pg.validate(), Err(TallyError::InvalidConfig(_))));
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let pg = PostgresConfig {
            password: "hunter2".to_string(),
            ..PostgresConfig::default()
        };
        let printed = format!("{:?}", pg);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_sqlite_path_resolution() {
        let data_dir = Path::new("/var/lib/killtally");
        let relative = SqliteConfig::default();
        assert_eq!(
            relative.resolve_path(data_dir),
            PathBuf::from("/var/lib/killtally/database.sqlite")
        );

        let absolute = SqliteConfig {
            file: "/tmp/kills.db".to_string(),
            ..SqliteConfig::default()
        };
        assert_eq!(absolute.resolve_path(data_dir), PathBuf::from("/tmp/kills.db"));
        assert!(SqliteConfig::in_memory().is_in_memory());
    }
}
