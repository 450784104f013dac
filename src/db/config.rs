// Database Configuration
// Connection settings and the driver profile derived from them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::dialect::{Dialect, DialectProvider, ErrorPatterns};
use crate::db::traits::{DatabaseError, SqlError};

/// Unified database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub dialect: Dialect,

    // Common connection fields
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or the file path for embedded engines
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Engine runs in-process and needs explicit transaction bracketing
    #[serde(default)]
    pub embedded: Option<bool>,
    /// Database is owned by this application; missing tables may be created
    #[serde(default)]
    pub internal: Option<bool>,

    /// Extra identifiers to quote on top of the dialect's own list
    #[serde(default)]
    pub reserved_words: Vec<String>,
    /// Replacement for the dialect's error classification heuristics
    #[serde(default)]
    pub error_patterns: Option<ErrorPatterns>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl DatabaseConfig {
    pub fn new(name: String, dialect: Dialect) -> Self {
        Self {
            id: new_id(),
            name,
            dialect,
            host: None,
            port: None,
            database: String::new(),
            username: None,
            password: String::new(),
            embedded: None,
            internal: None,
            reserved_words: Vec::new(),
            error_patterns: None,
        }
    }

    /// Configuration for a local SQLite file
    pub fn sqlite(name: &str, path: impl AsRef<Path>) -> Self {
        let mut config = Self::new(name.to_string(), Dialect::Sqlite);
        config.database = path.as_ref().to_string_lossy().to_string();
        config
    }

    pub fn from_json_str(json: &str) -> Result<Self, DatabaseError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded.unwrap_or_else(|| self.dialect.is_file_based())
    }

    pub fn is_internal(&self) -> bool {
        self.internal.unwrap_or_else(|| self.is_embedded())
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(if self.is_embedded() {
                format!("{} database path is required", self.dialect)
            } else {
                "Database name is required".to_string()
            }));
        }
        if !self.is_embedded() {
            if self.host.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
            }
            if self.username.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
            }
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.dialect.default_port())
    }
}

/// Driver descriptor: the dialect provider plus how the connection may be used
#[derive(Debug, Clone)]
pub struct DriverProfile {
    name: String,
    provider: Arc<DialectProvider>,
    embedded: bool,
    internal: bool,
}

impl DriverProfile {
    /// Profile with the dialect's defaults
    pub fn new(dialect: Dialect) -> Self {
        let embedded = dialect.is_file_based();
        Self::with_provider(DialectProvider::new(dialect), embedded, embedded)
    }

    pub fn with_provider(provider: DialectProvider, embedded: bool, internal: bool) -> Self {
        Self {
            name: provider.dialect().display_name().to_string(),
            provider: Arc::new(provider),
            embedded,
            internal,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        let mut provider = DialectProvider::new(config.dialect);
        for word in &config.reserved_words {
            provider.add_reserved_word(word);
        }
        if let Some(patterns) = &config.error_patterns {
            provider = provider.with_error_patterns(patterns.clone());
        }
        Self::with_provider(provider, config.is_embedded(), config.is_internal())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &DialectProvider {
        &self.provider
    }

    pub fn dialect(&self) -> Dialect {
        self.provider.dialect()
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn use_string_for_clob(&self) -> bool {
        self.provider.use_string_for_clob()
    }

    pub fn use_bytes_for_blob(&self) -> bool {
        self.provider.use_bytes_for_blob()
    }

    pub fn close_on_exception(&self) -> bool {
        self.provider.close_on_exception()
    }

    pub fn is_constraint_violation(&self, err: &SqlError) -> bool {
        self.provider.is_constraint_violation(err)
    }

    pub fn is_data_too_long(&self, err: &SqlError) -> bool {
        self.provider.is_data_too_long(err)
    }
}

/// Get the default embedded database path in the app data directory
pub fn get_default_db_path() -> Result<PathBuf, DatabaseError> {
    let proj_dirs = directories::ProjectDirs::from("com", "cms", "cms-store").ok_or_else(|| {
        DatabaseError::InvalidConfig("Failed to get app data directory".to_string())
    })?;

    Ok(proj_dirs.data_dir().join("cms.db"))
}
