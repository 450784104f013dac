// Database Drivers
// Native connections for the engines with a Rust driver (SQLite, PostgreSQL)

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

use crate::db::config::DatabaseConfig;
use crate::db::dialect::Dialect;
use crate::db::traits::{share, DatabaseError, SharedConnection};

/// Open a connection for the configured engine
pub fn connect(config: &DatabaseConfig) -> Result<SharedConnection, DatabaseError> {
    config.validate()?;

    let connection: Box<dyn crate::db::traits::Connection> = match config.dialect {
        Dialect::Sqlite => Box::new(SqliteConnection::open(config)?),
        Dialect::Postgresql => Box::new(PostgresConnection::connect(config)?),
        other => return Err(DatabaseError::UnsupportedDriver(other)),
    };

    tracing::info!(
        connection = %config.id,
        dialect = %config.dialect,
        "Opened database connection"
    );
    Ok(share(connection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_unsupported_dialect() {
        let mut config = DatabaseConfig::new("Derby".to_string(), Dialect::Derby);
        config.database = "/tmp/derby-db".to_string();
        assert!(matches!(
            connect(&config),
            Err(DatabaseError::UnsupportedDriver(Dialect::Derby))
        ));
    }

    #[test]
    fn test_connect_validates_first() {
        let config = DatabaseConfig::new("Empty".to_string(), Dialect::Sqlite);
        assert!(matches!(connect(&config), Err(DatabaseError::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_sqlite() {
        let db_path = std::env::temp_dir().join(format!("cms_connect_test_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&db_path);

        let config = DatabaseConfig::sqlite("Local", &db_path);
        let shared = connect(&config).unwrap();
        {
            let mut conn = shared.lock().unwrap();
            assert_eq!(conn.connection_id(), config.id);
            assert!(conn.is_alive());
        }

        drop(shared);
        let _ = std::fs::remove_file(&db_path);
    }
}
