//! Configuration for bugtrail
//!
//! Stored in `<config dir>/bugtrail/config.toml`. Every section is optional;
//! missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DSN_ENV: &str = "BUGTRAIL_DSN";
pub const API_PORT_ENV: &str = "BUGTRAIL_API_PORT";

/// bugtrail configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend settings
    pub database: DatabaseConfig,

    /// HTTP transport settings
    pub api: ApiConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `cockroach://user@host:port/db?sslmode=...`
    pub dsn: String,

    /// Upper bound on pooled connections
    pub max_connections: u32,

    /// How long to wait for a free connection before giving up
    pub acquire_timeout_secs: u64,

    /// Apply pending migrations when a binary starts
    pub migrate_on_start: bool,

    /// Level SQL statements are logged at (off, error, warn, info, debug, trace)
    pub statement_log_level: String,

    /// Statements slower than this are logged at warn
    pub slow_statement_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: "cockroach://root@localhost:26257/bugtrail?sslmode=disable".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
            migrate_on_start: true,
            statement_log_level: "debug".to_string(),
            slow_statement_ms: 1000,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Per-request deadline
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3847,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bugtrail").join("config.toml"))
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Invalid config: {}", e)))?;
        Ok(config)
    }

    /// Load from the default location, then apply environment overrides
    pub fn load_default() -> crate::Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `BUGTRAIL_DSN` and `BUGTRAIL_API_PORT` style overrides
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> crate::Result<()> {
        if let Some(dsn) = var(DSN_ENV).filter(|v| !v.is_empty()) {
            self.database.dsn = dsn;
        }
        if let Some(port) = var(API_PORT_ENV).filter(|v| !v.is_empty()) {
            self.api.port = port
                .parse()
                .map_err(|_| crate::Error::Config(format!("{API_PORT_ENV} is not a port: {port}")))?;
        }
        Ok(())
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a default config file with comments
    pub fn default_with_comments() -> String {
        r#"# bugtrail configuration

[database]
# CockroachDB connection string (overridden by $BUGTRAIL_DSN)
dsn = "cockroach://root@localhost:26257/bugtrail?sslmode=disable"

# Upper bound on pooled connections
max_connections = 10

# Seconds to wait for a free connection
acquire_timeout_secs = 5

# Apply pending migrations when a binary starts
migrate_on_start = true

# Level SQL statements are logged at (off, error, warn, info, debug, trace)
statement_log_level = "debug"

# Statements slower than this many milliseconds are logged at warn
slow_statement_ms = 1000

[api]
host = "127.0.0.1"

# Overridden by $BUGTRAIL_API_PORT
port = 3847

# Per-request deadline in seconds
request_timeout_secs = 30
"#
        .to_string()
    }
}
