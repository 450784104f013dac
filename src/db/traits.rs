// Database Driver Traits
// Defines the connection seam every gateway talks through, plus the shared value,
// row and error types that drivers produce

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::dialect::Dialect;

/// Handle of a statement prepared on a [`Connection`]
pub type StatementId = u64;

/// A connection shared by every gateway of one registry, owned by the caller
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// Wrap a concrete connection for sharing across gateways
pub fn share(connection: Box<dyn Connection>) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// Message reported for operations on an unknown or already closed statement
pub const STATEMENT_NOT_EXECUTING: &str = "statement is not executing";

/// Driver-reported error class, mirroring the typed exceptions some drivers raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlErrorKind {
    IntegrityConstraint,
    DataTruncation,
    Syntax,
    Connection,
    Timeout,
    Other,
}

/// Error raised by a driver while talking to the database
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SqlError {
    pub kind: SqlErrorKind,
    /// Five character SQLSTATE, when the driver reports one
    pub sql_state: Option<String>,
    /// Vendor specific error code (SQLite extended result code, MySQL errno, ...)
    pub vendor_code: Option<i32>,
    pub message: String,
}

impl SqlError {
    pub fn new(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql_state: None,
            vendor_code: None,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::Other, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::Timeout, message)
    }

    pub fn with_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_vendor_code(mut self, code: i32) -> Self {
        self.vendor_code = Some(code);
        self
    }

    /// Error for a statement handle the connection no longer knows about
    pub fn statement_not_executing() -> Self {
        Self::other(STATEMENT_NOT_EXECUTING)
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Invalid table definition: {0}")]
    InvalidSchema(String),

    #[error("No native driver for database type: {0:?}")]
    UnsupportedDriver(Dialect),

    #[error("Gateway not found: {0}")]
    GatewayNotFound(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// The driver error underneath, if this is one
    pub fn as_sql(&self) -> Option<&SqlError> {
        match self {
            DatabaseError::Sql(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of a non-fatal operation (schema changes, statement housekeeping)
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Outcome {
    /// The operation ran and changed something
    Applied,
    /// Nothing to do: the table already exists, the connection is external, ...
    Unchanged,
    /// The operation failed in a known benign way
    Ignored(SqlError),
    /// The operation failed; state is as it was before the call
    Failed(SqlError),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Result of an insert that tolerates existing records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The database reported a constraint violation: the record is already there
    AlreadyExists,
}

/// Cell value bound to or read from a statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Int(i64::from(value))
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        CellValue::Binary(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// One result row; column lookup ignores case since engines fold identifiers differently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<CellValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<CellValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            CellValue::String(s) => Some(s.clone()),
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Timestamp(t) => Some(t.to_rfc3339()),
            CellValue::Binary(_) | CellValue::Null => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            CellValue::Int(i) => Some(*i),
            CellValue::Bool(b) => Some(i64::from(*b)),
            CellValue::Float(f) => Some(*f as i64),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Booleans come back as integers from engines without a native type
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            CellValue::Bool(b) => Some(*b),
            CellValue::Int(i) => Some(*i != 0),
            CellValue::String(s) => match s.trim() {
                "1" | "true" | "TRUE" | "Y" | "y" => Some(true),
                "0" | "false" | "FALSE" | "N" | "n" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Accepts native timestamps and epoch millis
    pub fn get_timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        match self.get(column)? {
            CellValue::Timestamp(t) => Some(*t),
            CellValue::Int(millis) => DateTime::<Utc>::from_timestamp_millis(*millis),
            CellValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn get_bytes(&self, column: &str) -> Option<Vec<u8>> {
        match self.get(column)? {
            CellValue::Binary(b) => Some(b.clone()),
            _ => None,
        }
    }
}

/// Connection trait - every driver connection implements this
///
/// Calls block the current thread. A connection is shared by all gateways of a
/// registry, so callers serialize access through [`SharedConnection`].
pub trait Connection: Send {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Test if the connection is alive
    fn is_alive(&mut self) -> bool;

    /// Metadata probe for a table
    fn table_exists(&mut self, table: &str) -> Result<bool, SqlError>;

    /// Metadata probe for a column of a table
    fn column_exists(&mut self, table: &str, column: &str) -> Result<bool, SqlError>;

    /// Run a one-off statement (DDL, maintenance) outside the statement cache
    fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError>;

    /// Prepare a statement and return its handle
    fn prepare(&mut self, sql: &str) -> Result<StatementId, SqlError>;

    /// Execute a prepared statement, returning the number of affected rows
    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<u64, SqlError>;

    /// Run a prepared query and collect its rows
    fn query(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<Vec<Row>, SqlError>;

    /// Drop the parameters bound to a prepared statement
    fn clear_parameters(&mut self, stmt: StatementId) -> Result<(), SqlError>;

    /// Release a prepared statement; unknown handles are ignored
    fn close_statement(&mut self, stmt: StatementId);

    /// `false` opens a transaction, `true` commits any open one
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), SqlError>;
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.connection_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec!["ID".to_string(), "flag".to_string(), "created".to_string()],
            vec![
                CellValue::String("a".to_string()),
                CellValue::Int(1),
                CellValue::Int(86_400_000),
            ],
        )
    }

    #[test]
    fn test_row_lookup_ignores_case() {
        let row = sample_row();
        assert_eq!(row.get_string("id"), Some("a".to_string()));
        assert_eq!(row.get_bool("FLAG"), Some(true));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_row_timestamp_from_millis() {
        let row = sample_row();
        let ts = row.get_timestamp("created").unwrap();
        assert_eq!(ts.timestamp_millis(), 86_400_000);
    }

    #[test]
    fn test_option_into_cell_value() {
        let none: Option<String> = None;
        assert!(CellValue::from(none).is_null());
        assert_eq!(CellValue::from(Some(5_i64)), CellValue::Int(5));
    }

    #[test]
    fn test_sql_error_builders() {
        let err = SqlError::new(SqlErrorKind::IntegrityConstraint, "dup")
            .with_state("23505")
            .with_vendor_code(2067);
        assert_eq!(err.sql_state.as_deref(), Some("23505"));
        assert_eq!(err.vendor_code, Some(2067));
        assert_eq!(err.to_string(), "dup");

        let wrapped = DatabaseError::from(err.clone());
        assert_eq!(wrapped.as_sql(), Some(&err));
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(Outcome::Applied.is_applied());
        assert!(Outcome::Failed(SqlError::other("x")).is_failed());
        assert!(!Outcome::Unchanged.is_failed());
    }
}
