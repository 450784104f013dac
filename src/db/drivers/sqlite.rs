// SQLite Driver
// Implements the Connection trait for SQLite using rusqlite (embedded, single writer)

use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection as RusqliteConnection, ErrorCode, OpenFlags, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::db::config::DatabaseConfig;
use crate::db::traits::{
    CellValue, Connection, DatabaseError, Row, SqlError, SqlErrorKind, StatementId,
};

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            CellValue::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
            CellValue::Int(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            CellValue::Float(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            CellValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            // Stored as epoch millis
            CellValue::Timestamp(t) => ToSqlOutput::Owned(SqliteValue::Integer(t.timestamp_millis())),
            CellValue::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<rusqlite::Error> for SqlError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let kind = match failure.code {
                    ErrorCode::ConstraintViolation => SqlErrorKind::IntegrityConstraint,
                    ErrorCode::TooBig => SqlErrorKind::DataTruncation,
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase => SqlErrorKind::Connection,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => SqlErrorKind::Timeout,
                    _ => SqlErrorKind::Other,
                };
                let text = message.clone().unwrap_or_else(|| err.to_string());
                SqlError::new(kind, text).with_vendor_code(failure.extended_code)
            }
            rusqlite::Error::InvalidParameterCount(..) | rusqlite::Error::InvalidColumnName(_) => {
                SqlError::new(SqlErrorKind::Syntax, err.to_string())
            }
            _ => SqlError::other(err.to_string()),
        }
    }
}

/// SQLite connection wrapper
///
/// Prepared statements live in rusqlite's statement cache keyed by SQL text; a
/// handle maps to the text it was prepared from.
pub struct SqliteConnection {
    id: String,
    conn: RusqliteConnection,
    statements: HashMap<StatementId, String>,
    next_statement: StatementId,
}

impl SqliteConnection {
    /// Open (or create) the database file named by the config
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = Self::get_database_path(config)?;
        let mut connection = Self::open_path(&path)?;
        connection.id = config.id.clone();
        Ok(connection)
    }

    /// Open (or create) a database file directly
    pub fn open_path(path: &str) -> Result<Self, DatabaseError> {
        let conn = RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(SqlError::from)?;
        // Sized for the handful of statements each gateway keeps
        conn.set_prepared_statement_cache_capacity(128);

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            conn,
            statements: HashMap::new(),
            next_statement: 1,
        })
    }

    /// Extract database path from config
    fn get_database_path(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "SQLite database path is required".to_string(),
            ));
        }

        // Expand ~ to home directory if present
        let path = if let Some(rest) = config.database.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => Path::new(&home).join(rest).to_string_lossy().to_string(),
                None => config.database.clone(),
            }
        } else {
            config.database.clone()
        };

        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(path)
    }

    fn statement_sql(&self, stmt: StatementId) -> Result<&str, SqlError> {
        self.statements
            .get(&stmt)
            .map(String::as_str)
            .ok_or_else(SqlError::statement_not_executing)
    }

    /// Extract cell value from row
    fn cell_value(value: ValueRef<'_>) -> CellValue {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Int(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(t) => CellValue::String(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => CellValue::Binary(b.to_vec()),
        }
    }
}

impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn is_alive(&mut self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, SqlError> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?1 COLLATE NOCASE",
            [table],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn column_exists(&mut self, table: &str, column: &str) -> Result<bool, SqlError> {
        let exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
            [table, column],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId, SqlError> {
        // Compile now so syntax errors surface at prepare time
        self.conn.prepare_cached(sql)?;

        let id = self.next_statement;
        self.next_statement += 1;
        self.statements.insert(id, sql.to_string());
        Ok(id)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<u64, SqlError> {
        let sql = self.statement_sql(stmt)?;
        self.conn.busy_timeout(timeout)?;

        let mut statement = self.conn.prepare_cached(sql)?;
        let affected = statement.execute(params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    fn query(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<Vec<Row>, SqlError> {
        let sql = self.statement_sql(stmt)?;
        self.conn.busy_timeout(timeout)?;

        let mut statement = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(Self::cell_value(row.get_ref(idx)?));
            }
            result.push(Row::new(columns.clone(), values));
        }
        Ok(result)
    }

    fn clear_parameters(&mut self, stmt: StatementId) -> Result<(), SqlError> {
        // Parameters are bound per call; only the handle has to be live
        self.statement_sql(stmt).map(|_| ())
    }

    fn close_statement(&mut self, stmt: StatementId) {
        self.statements.remove(&stmt);
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), SqlError> {
        match (auto_commit, self.conn.is_autocommit()) {
            (false, true) => self.conn.execute_batch("BEGIN")?,
            (true, false) => self.conn.execute_batch("COMMIT")?,
            _ => {}
        }
        Ok(())
    }
}
