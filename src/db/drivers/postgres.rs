// PostgreSQL Driver
// Implements the Connection trait for PostgreSQL using tokio-postgres on a private runtime

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Statement};

use crate::db::config::DatabaseConfig;
use crate::db::traits::{
    CellValue, Connection, DatabaseError, Row, SqlError, SqlErrorKind, StatementId,
};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

impl From<tokio_postgres::Error> for SqlError {
    fn from(err: tokio_postgres::Error) -> Self {
        let Some(db_error) = err.as_db_error() else {
            let kind = if err.is_closed() {
                SqlErrorKind::Connection
            } else {
                SqlErrorKind::Other
            };
            return SqlError::new(kind, err.to_string());
        };

        let state = db_error.code();
        let code = state.code();
        let kind = if code.starts_with("23") {
            SqlErrorKind::IntegrityConstraint
        } else if *state == SqlState::STRING_DATA_RIGHT_TRUNCATION {
            SqlErrorKind::DataTruncation
        } else if code.starts_with("42") {
            SqlErrorKind::Syntax
        } else if code.starts_with("08") {
            SqlErrorKind::Connection
        } else if *state == SqlState::QUERY_CANCELED {
            SqlErrorKind::Timeout
        } else {
            SqlErrorKind::Other
        };

        SqlError::new(kind, db_error.message()).with_state(code)
    }
}

/// Rewrite `?` placeholders to `$n`, leaving quoted text alone
pub fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                _ => out.push(ch),
            },
        }
    }
    out
}

fn overflow(value: i64, ty: &Type) -> SqlError {
    SqlError::new(
        SqlErrorKind::DataTruncation,
        format!("value {} out of range for type {}", value, ty.name()),
    )
    .with_state(SqlState::NUMERIC_VALUE_OUT_OF_RANGE.code())
}

fn mismatch(value: &CellValue, ty: &Type) -> SqlError {
    SqlError::new(
        SqlErrorKind::Other,
        format!("cannot bind {:?} to parameter of type {}", value, ty.name()),
    )
    .with_state(SqlState::DATATYPE_MISMATCH.code())
}

/// Null typed for the parameter slot, since the server checks the declared type
fn typed_null(ty: &Type) -> BoxedParam {
    match *ty {
        Type::BOOL => Box::new(Option::<bool>::None),
        Type::INT2 => Box::new(Option::<i16>::None),
        Type::INT4 => Box::new(Option::<i32>::None),
        Type::INT8 => Box::new(Option::<i64>::None),
        Type::FLOAT4 => Box::new(Option::<f32>::None),
        Type::FLOAT8 => Box::new(Option::<f64>::None),
        Type::BYTEA => Box::new(Option::<Vec<u8>>::None),
        Type::TIMESTAMP => Box::new(Option::<chrono::NaiveDateTime>::None),
        Type::TIMESTAMPTZ => Box::new(Option::<DateTime<Utc>>::None),
        _ => Box::new(Option::<String>::None),
    }
}

/// Convert a cell value to a parameter of the type the prepared statement declares
pub fn value_to_sql(value: &CellValue, ty: &Type) -> Result<BoxedParam, SqlError> {
    let param: BoxedParam = match (value, ty) {
        (CellValue::Null, _) => typed_null(ty),

        (CellValue::Bool(b), &Type::BOOL) => Box::new(*b),
        (CellValue::Bool(b), &Type::INT2) => Box::new(i16::from(*b)),
        (CellValue::Bool(b), &Type::INT4) => Box::new(i32::from(*b)),
        (CellValue::Bool(b), &Type::INT8) => Box::new(i64::from(*b)),

        (CellValue::Int(i), &Type::INT2) => {
            Box::new(i16::try_from(*i).map_err(|_| overflow(*i, ty))?)
        }
        (CellValue::Int(i), &Type::INT4) => {
            Box::new(i32::try_from(*i).map_err(|_| overflow(*i, ty))?)
        }
        (CellValue::Int(i), &Type::INT8) => Box::new(*i),
        (CellValue::Int(i), &Type::FLOAT8) => Box::new(*i as f64),
        (CellValue::Int(i), &Type::BOOL) => Box::new(*i != 0),
        (CellValue::Int(i), &Type::TIMESTAMP) => Box::new(
            DateTime::<Utc>::from_timestamp_millis(*i)
                .ok_or_else(|| overflow(*i, ty))?
                .naive_utc(),
        ),
        (CellValue::Int(i), &Type::TIMESTAMPTZ) => Box::new(
            DateTime::<Utc>::from_timestamp_millis(*i).ok_or_else(|| overflow(*i, ty))?,
        ),

        (CellValue::Float(f), &Type::FLOAT4) => Box::new(*f as f32),
        (CellValue::Float(f), &Type::FLOAT8) => Box::new(*f),

        (CellValue::String(s), &Type::VARCHAR | &Type::TEXT | &Type::BPCHAR | &Type::NAME) => {
            Box::new(s.clone())
        }

        (CellValue::Timestamp(t), &Type::TIMESTAMP) => Box::new(t.naive_utc()),
        (CellValue::Timestamp(t), &Type::TIMESTAMPTZ) => Box::new(*t),
        (CellValue::Timestamp(t), &Type::INT8) => Box::new(t.timestamp_millis()),
        (CellValue::Timestamp(t), &Type::DATE) => Box::new(t.date_naive()),

        (CellValue::Binary(b), &Type::BYTEA) => Box::new(b.clone()),

        // Untyped text slots accept the literal form
        (CellValue::Int(i), &Type::VARCHAR | &Type::TEXT) => Box::new(i.to_string()),
        (CellValue::Bool(b), &Type::VARCHAR | &Type::TEXT) => Box::new(b.to_string()),

        _ => return Err(mismatch(value, ty)),
    };
    Ok(param)
}

/// Convert a PostgreSQL value to a cell value
fn pg_value_to_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> CellValue {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).ok().flatten().map(CellValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).ok().flatten().map(CellValue::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).ok().flatten().map(CellValue::Float),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Binary),
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Timestamp(v.and_utc())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Timestamp),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::String),
    };
    value.unwrap_or(CellValue::Null)
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| pg_value_to_cell(pg_row, idx, col.type_()))
        .collect();
    Row::new(columns, values)
}

/// PostgreSQL connection wrapper
///
/// The client is async; every call is driven to completion on a private
/// current-thread runtime, which also polls the connection task.
pub struct PostgresConnection {
    id: String,
    runtime: Runtime,
    client: Client,
    statements: HashMap<StatementId, Statement>,
    next_statement: StatementId,
    in_transaction: bool,
}

impl PostgresConnection {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let conn_string = Self::build_connection_string(config)?;
        let runtime = Builder::new_current_thread().enable_all().build()?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(&conn_string, NoTls))
            .map_err(|e| {
                DatabaseError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
            })?;

        let id = config.id.clone();
        let task_id = id.clone();
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(connection = %task_id, error = %e, "PostgreSQL connection closed");
            }
        });

        Ok(Self {
            id,
            runtime,
            client,
            statements: HashMap::new(),
            next_statement: 1,
            in_transaction: false,
        })
    }

    /// Build PostgreSQL connection string from config
    fn build_connection_string(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        let host = config
            .host
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let port = config.get_port();
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
        }
        let username = config
            .username
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;

        let mut conn_string = format!(
            "host={} port={} dbname={} user={}",
            host, port, config.database, username
        );
        if !config.password.is_empty() {
            conn_string.push_str(&format!(" password={}", config.password));
        }
        Ok(conn_string)
    }

    fn run<F, T>(&self, timeout: Duration, future: F) -> Result<T, SqlError>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, future).await })
            .map_err(|_| SqlError::timeout(format!("statement timed out after {:?}", timeout)))?
            .map_err(SqlError::from)
    }

    fn bind(statement: &Statement, params: &[CellValue]) -> Result<Vec<BoxedParam>, SqlError> {
        if statement.params().len() != params.len() {
            return Err(SqlError::new(
                SqlErrorKind::Syntax,
                format!(
                    "expected {} parameters but got {}",
                    statement.params().len(),
                    params.len()
                ),
            ));
        }
        params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| value_to_sql(value, ty))
            .collect()
    }

    fn statement(&self, stmt: StatementId) -> Result<&Statement, SqlError> {
        self.statements
            .get(&stmt)
            .ok_or_else(SqlError::statement_not_executing)
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn is_alive(&mut self) -> bool {
        !self.client.is_closed() && self.run(PROBE_TIMEOUT, self.client.simple_query("SELECT 1")).is_ok()
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, SqlError> {
        let row = self.run(
            PROBE_TIMEOUT,
            self.client.query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND lower(table_name) = lower($1))",
                &[&table],
            ),
        )?;
        Ok(row.get(0))
    }

    fn column_exists(&mut self, table: &str, column: &str) -> Result<bool, SqlError> {
        let row = self.run(
            PROBE_TIMEOUT,
            self.client.query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND lower(table_name) = lower($1) \
                 AND lower(column_name) = lower($2))",
                &[&table, &column],
            ),
        )?;
        Ok(row.get(0))
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<(), SqlError> {
        self.run(PROBE_TIMEOUT, self.client.batch_execute(sql))
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId, SqlError> {
        let numbered = number_placeholders(sql);
        let statement = self.run(PROBE_TIMEOUT, self.client.prepare(&numbered))?;

        let id = self.next_statement;
        self.next_statement += 1;
        self.statements.insert(id, statement);
        Ok(id)
    }

    fn execute(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<u64, SqlError> {
        let statement = self.statement(stmt)?;
        let boxed = Self::bind(statement, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        self.run(timeout, self.client.execute(statement, &refs))
    }

    fn query(
        &mut self,
        stmt: StatementId,
        params: &[CellValue],
        timeout: Duration,
    ) -> Result<Vec<Row>, SqlError> {
        let statement = self.statement(stmt)?;
        let boxed = Self::bind(statement, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self.run(timeout, self.client.query(statement, &refs))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    fn clear_parameters(&mut self, stmt: StatementId) -> Result<(), SqlError> {
        // Parameters are bound per call; only the handle has to be live
        self.statement(stmt).map(|_| ())
    }

    fn close_statement(&mut self, stmt: StatementId) {
        // Dropping the Statement deallocates it server-side
        self.statements.remove(&stmt);
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), SqlError> {
        match (auto_commit, self.in_transaction) {
            (false, false) => {
                self.run(PROBE_TIMEOUT, self.client.batch_execute("BEGIN"))?;
                self.in_transaction = true;
            }
            (true, true) => {
                self.run(PROBE_TIMEOUT, self.client.batch_execute("COMMIT"))?;
                self.in_transaction = false;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::Dialect;
    use chrono::TimeZone;

    fn server_config() -> DatabaseConfig {
        let mut config = DatabaseConfig::new("Test DB".to_string(), Dialect::Postgresql);
        config.host = Some("localhost".to_string());
        config.database = "testdb".to_string();
        config.username = Some("testuser".to_string());
        config
    }

    #[test]
    fn test_connection_string_building() {
        let mut config = server_config();
        config.port = Some(5433);
        config.password = "testpass".to_string();

        let conn_string = PostgresConnection::build_connection_string(&config).unwrap();
        assert!(conn_string.contains("host=localhost"));
        assert!(conn_string.contains("port=5433"));
        assert!(conn_string.contains("dbname=testdb"));
        assert!(conn_string.contains("user=testuser"));
        assert!(conn_string.contains("password=testpass"));
    }

    #[test]
    fn test_connection_string_defaults() {
        let conn_string = PostgresConnection::build_connection_string(&server_config()).unwrap();
        assert!(conn_string.contains("port=5432"));
        assert!(!conn_string.contains("password="));
    }

    #[test]
    fn test_connection_string_requires_host() {
        let mut config = server_config();
        config.host = None;
        assert!(matches!(
            PostgresConnection::build_connection_string(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_number_placeholders() {
        assert_eq!(
            number_placeholders("UPDATE t SET a=?, b='?' WHERE c=?"),
            "UPDATE t SET a=$1, b='?' WHERE c=$2"
        );
        assert_eq!(number_placeholders("SELECT 1"), "SELECT 1");
        assert_eq!(
            number_placeholders("SELECT \"why?\" FROM t WHERE x = ?"),
            "SELECT \"why?\" FROM t WHERE x = $1"
        );
    }

    #[test]
    fn test_value_conversion_accepts_declared_types() {
        assert!(value_to_sql(&CellValue::Int(7), &Type::INT4).is_ok());
        assert!(value_to_sql(&CellValue::Bool(true), &Type::BOOL).is_ok());
        assert!(value_to_sql(&CellValue::Null, &Type::BYTEA).is_ok());
        assert!(value_to_sql(&CellValue::from("x"), &Type::TEXT).is_ok());

        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert!(value_to_sql(&CellValue::Timestamp(ts), &Type::TIMESTAMP).is_ok());
        assert!(value_to_sql(&CellValue::Binary(vec![1]), &Type::BYTEA).is_ok());
    }

    #[test]
    fn test_value_conversion_overflow_is_truncation() {
        let err = value_to_sql(&CellValue::Int(70_000), &Type::INT2).err().unwrap();
        assert_eq!(err.kind, SqlErrorKind::DataTruncation);
        assert_eq!(err.sql_state.as_deref(), Some("22003"));
    }

    #[test]
    fn test_value_conversion_mismatch() {
        let err = value_to_sql(&CellValue::Binary(vec![1]), &Type::INT4).err().unwrap();
        assert_eq!(err.sql_state.as_deref(), Some("42804"));
    }
}
