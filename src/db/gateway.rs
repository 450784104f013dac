// Table Gateway
// Per-table access object: owns the table definition, creates the table on internal
// databases, and runs the table's prepared statements over the shared connection

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::db::config::DriverProfile;
use crate::db::dialect::DialectProvider;
use crate::db::schema::{TableSpec, TableSpecBuilder};
use crate::db::traits::{
    CellValue, Connection, DatabaseError, InsertOutcome, Outcome, Row, SharedConnection,
    SqlError, StatementId, STATEMENT_NOT_EXECUTING,
};

/// Timeout applied to every prepared statement
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Driver profile plus the connection the gateways of one registry share
#[derive(Debug, Clone)]
pub struct Session {
    driver: DriverProfile,
    connection: Option<SharedConnection>,
}

impl Session {
    pub fn new(driver: DriverProfile, connection: Option<SharedConnection>) -> Self {
        Self { driver, connection }
    }

    pub fn driver(&self) -> &DriverProfile {
        &self.driver
    }

    pub fn provider(&self) -> &DialectProvider {
        self.driver.provider()
    }

    pub fn connection(&self) -> Option<&SharedConnection> {
        self.connection.as_ref()
    }
}

/// Where the gateway's table stands, as far as the gateway knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Existence could not be probed (no connection, probe failed)
    Unchecked,
    Absent,
    Created,
}

struct GatewayState {
    table: TableState,
    statements: HashMap<&'static str, StatementId>,
}

fn lock_connection(connection: &SharedConnection) -> Result<MutexGuard<'_, Box<dyn Connection>>, DatabaseError> {
    connection
        .lock()
        .map_err(|_| DatabaseError::LockPoisoned("connection"))
}

/// Gateway for one table
///
/// All statement work holds the gateway lock first and the connection lock second,
/// so calls on one gateway run one at a time.
pub struct TableGateway {
    session: Session,
    spec: TableSpec,
    state: Mutex<GatewayState>,
}

impl std::fmt::Debug for TableGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableGateway")
            .field("table", &self.spec.name())
            .field("state", &self.table_state())
            .finish()
    }
}

impl TableGateway {
    /// Build the table definition and probe whether the table exists
    ///
    /// `define` receives a builder already named after the (folded) table name.
    pub fn new<F>(session: Session, name: &str, define: F) -> Result<Self, DatabaseError>
    where
        F: FnOnce(TableSpecBuilder) -> TableSpecBuilder,
    {
        let table_name = session.provider().fold_identifier(name);
        let spec = define(TableSpec::builder(table_name)).build()?;

        let gateway = Self {
            session,
            spec,
            state: Mutex::new(GatewayState {
                table: TableState::Unchecked,
                statements: HashMap::new(),
            }),
        };

        let table = gateway.probe_table();
        if let Ok(mut state) = gateway.state.lock() {
            state.table = table;
        }
        Ok(gateway)
    }

    fn probe_table(&self) -> TableState {
        let Some(connection) = self.session.connection() else {
            return TableState::Unchecked;
        };
        let probe = lock_connection(connection)
            .and_then(|mut conn| conn.table_exists(self.spec.name()).map_err(DatabaseError::from));

        match probe {
            Ok(true) => TableState::Created,
            Ok(false) => TableState::Absent,
            Err(e) => {
                tracing::warn!(table = %self.spec.name(), error = %e, "Table probe failed");
                TableState::Unchecked
            }
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GatewayState>, DatabaseError> {
        self.state
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("gateway state"))
    }

    pub fn table_name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn provider(&self) -> &DialectProvider {
        self.session.provider()
    }

    pub fn driver(&self) -> &DriverProfile {
        self.session.driver()
    }

    pub fn table_state(&self) -> TableState {
        self.state
            .lock()
            .map(|s| s.table)
            .unwrap_or(TableState::Unchecked)
    }

    pub fn has_table(&self) -> bool {
        self.table_state() == TableState::Created
    }

    /// Live metadata probe, never cached
    pub fn has_column(&self, column: &str) -> Result<bool, DatabaseError> {
        let Some(connection) = self.session.connection() else {
            return Ok(false);
        };
        let mut conn = lock_connection(connection)?;
        Ok(conn.column_exists(self.spec.name(), column)?)
    }

    /// Whether per-row operations can run: table present and a connection bound
    pub fn has_connection(&self) -> bool {
        self.has_table() && self.session.connection().is_some()
    }

    /// Create the table if it is missing and the database is ours to manage
    pub fn check_table(&self) -> Outcome {
        let Some(connection) = self.session.connection() else {
            return Outcome::Unchanged;
        };
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => return Outcome::Failed(SqlError::other(e.to_string())),
        };

        // Re-probe unless known present
        if state.table != TableState::Created {
            drop(state);
            let table = self.probe_table();
            state = match self.lock_state() {
                Ok(state) => state,
                Err(e) => return Outcome::Failed(SqlError::other(e.to_string())),
            };
            state.table = table;
        }

        if state.table != TableState::Absent {
            return Outcome::Unchanged;
        }
        if !self.session.driver().is_internal() {
            tracing::debug!(table = %self.spec.name(), "Skipping table creation on external database");
            return Outcome::Unchanged;
        }

        self.create_locked(&mut state, connection)
    }

    /// Issue CREATE TABLE and CREATE INDEX; failures are reported, not raised
    pub fn create_table(&self) -> Outcome {
        let Some(connection) = self.session.connection() else {
            return Outcome::Unchanged;
        };
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => return Outcome::Failed(SqlError::other(e.to_string())),
        };
        if state.table == TableState::Created {
            return Outcome::Unchanged;
        }
        self.create_locked(&mut state, connection)
    }

    fn create_locked(&self, state: &mut GatewayState, connection: &SharedConnection) -> Outcome {
        let provider = self.session.provider();
        let mut statements = vec![self.spec.table_sql(provider)];
        statements.extend(self.spec.indices_sql(provider));

        let result = lock_connection(connection).and_then(|mut conn| {
            for sql in &statements {
                conn.execute_ddl(sql)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                state.table = TableState::Created;
                tracing::info!(table = %self.spec.name(), "Created table");
                Outcome::Applied
            }
            Err(e) => {
                tracing::warn!(table = %self.spec.name(), error = %e, "Unable to create table");
                // CREATE TABLE may have gone through before a later index failed
                if self.probe_table() == TableState::Created {
                    state.table = TableState::Created;
                }
                Outcome::Failed(into_sql_error(e))
            }
        }
    }

    /// Drop the table; failures are reported, not raised
    pub fn drop_table(&self) -> Outcome {
        let Some(connection) = self.session.connection() else {
            return Outcome::Unchanged;
        };
        let mut state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => return Outcome::Failed(SqlError::other(e.to_string())),
        };
        if state.table != TableState::Created {
            return Outcome::Unchanged;
        }

        let sql = self
            .session
            .provider()
            .quote_reserved_words(&format!("DROP TABLE {}", self.spec.name()));
        let result = lock_connection(connection).and_then(|mut conn| {
            // Statements on a dropped table are stale
            for (_, stmt) in state.statements.drain() {
                conn.close_statement(stmt);
            }
            conn.execute_ddl(&sql).map_err(DatabaseError::from)
        });

        match result {
            Ok(()) => {
                state.table = TableState::Absent;
                tracing::info!(table = %self.spec.name(), "Dropped table");
                Outcome::Applied
            }
            Err(e) => {
                tracing::warn!(table = %self.spec.name(), error = %e, "Unable to drop table");
                Outcome::Failed(into_sql_error(e))
            }
        }
    }

    /// Read a CLOB column as text
    pub fn get_clob(&self, row: &Row, column: &str) -> Option<String> {
        if self.session.driver().use_string_for_clob() {
            return row.get_string(column);
        }
        match row.get(column)? {
            CellValue::String(s) => Some(s.clone()),
            CellValue::Binary(b) => Some(String::from_utf8_lossy(b).to_string()),
            _ => None,
        }
    }

    /// Read a BLOB column as bytes
    pub fn get_blob(&self, row: &Row, column: &str) -> Option<Vec<u8>> {
        if self.session.driver().use_bytes_for_blob() {
            return row.get_bytes(column);
        }
        match row.get(column)? {
            CellValue::Binary(b) => Some(b.clone()),
            CellValue::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }

    pub fn bool_value(&self, value: bool) -> CellValue {
        self.session.provider().boolean_value(value)
    }

    /// Open a transaction on embedded engines
    pub fn pre_query(&self) -> Result<(), DatabaseError> {
        self.set_auto_commit(false)
    }

    /// Commit the transaction opened by [`pre_query`](Self::pre_query)
    pub fn post_query(&self) -> Result<(), DatabaseError> {
        self.set_auto_commit(true)
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), DatabaseError> {
        if !self.session.driver().is_embedded() {
            return Ok(());
        }
        let Some(connection) = self.session.connection() else {
            return Ok(());
        };
        let mut conn = lock_connection(connection)?;
        Ok(conn.set_auto_commit(auto_commit)?)
    }

    /// Reset the bound parameters of a cached statement
    ///
    /// SQLite reports "statement is not executing" after some failures; that case
    /// is ignored.
    pub fn clear_parameters(&self, key: &str) -> Outcome {
        let Some(connection) = self.session.connection() else {
            return Outcome::Unchanged;
        };
        let state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => return Outcome::Failed(SqlError::other(e.to_string())),
        };
        let Some(&stmt) = state.statements.get(key) else {
            return Outcome::Unchanged;
        };

        let result = lock_connection(connection)
            .and_then(|mut conn| conn.clear_parameters(stmt).map_err(DatabaseError::from));
        match result {
            Ok(()) => Outcome::Applied,
            Err(e) => {
                let err = into_sql_error(e);
                if err.message.contains(STATEMENT_NOT_EXECUTING) {
                    tracing::debug!(table = %self.spec.name(), query = key, "Ignoring statement state error");
                    Outcome::Ignored(err)
                } else {
                    tracing::warn!(table = %self.spec.name(), query = key, error = %err, "Unable to clear parameters");
                    Outcome::Failed(err)
                }
            }
        }
    }

    /// Number of prepared statements currently cached
    pub fn cached_statements(&self) -> usize {
        self.state.lock().map(|s| s.statements.len()).unwrap_or(0)
    }

    /// Run `op` with the cached statement for `key`, preparing it on first use
    fn with_statement<T>(
        &self,
        key: &'static str,
        sql: &str,
        op: impl FnOnce(&mut dyn Connection, StatementId) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        let Some(connection) = self.session.connection() else {
            return Ok(None);
        };
        let mut state = self.lock_state().map_err(into_sql_error)?;
        if state.table != TableState::Created {
            return Ok(None);
        }
        let mut conn = lock_connection(connection).map_err(into_sql_error)?;

        let stmt = match state.statements.get(key) {
            Some(&stmt) => stmt,
            None => {
                let quoted = self.session.provider().quote_reserved_words(sql);
                let stmt = conn.prepare(&quoted)?;
                tracing::debug!(table = %self.spec.name(), query = key, "Prepared statement");
                state.statements.insert(key, stmt);
                stmt
            }
        };

        match op(&mut **conn, stmt) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                if self.session.driver().close_on_exception() {
                    conn.close_statement(stmt);
                    state.statements.remove(key);
                    tracing::debug!(table = %self.spec.name(), query = key, "Discarded failed statement");
                }
                Err(e)
            }
        }
    }

    /// Run an UPDATE/DELETE; `None` when the table or connection is not ready
    pub fn execute_update(
        &self,
        key: &'static str,
        sql: &str,
        params: &[CellValue],
    ) -> Result<Option<u64>, DatabaseError> {
        Ok(self.with_statement(key, sql, |conn, stmt| {
            conn.execute(stmt, params, QUERY_TIMEOUT)
        })?)
    }

    /// Run a query; empty when the table or connection is not ready
    pub fn query_rows(
        &self,
        key: &'static str,
        sql: &str,
        params: &[CellValue],
    ) -> Result<Vec<Row>, DatabaseError> {
        let rows = self.with_statement(key, sql, |conn, stmt| {
            conn.query(stmt, params, QUERY_TIMEOUT)
        })?;
        Ok(rows.unwrap_or_default())
    }

    /// First row of a query, if any
    pub fn query_one(
        &self,
        key: &'static str,
        sql: &str,
        params: &[CellValue],
    ) -> Result<Option<Row>, DatabaseError> {
        Ok(self.query_rows(key, sql, params)?.into_iter().next())
    }

    /// Run an INSERT, treating a constraint violation as an existing record
    pub fn insert(
        &self,
        key: &'static str,
        sql: &str,
        params: &[CellValue],
    ) -> Result<Option<InsertOutcome>, DatabaseError> {
        match self.with_statement(key, sql, |conn, stmt| conn.execute(stmt, params, QUERY_TIMEOUT)) {
            Ok(None) => Ok(None),
            Ok(Some(_)) => Ok(Some(InsertOutcome::Inserted)),
            Err(e) if self.session.driver().is_constraint_violation(&e) => {
                tracing::debug!(table = %self.spec.name(), error = %e, "Record already exists");
                Ok(Some(InsertOutcome::AlreadyExists))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release every cached statement
    pub fn close(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.statements.is_empty() {
            return;
        }
        let Some(connection) = self.session.connection() else {
            state.statements.clear();
            return;
        };
        match lock_connection(connection) {
            Ok(mut conn) => {
                for (_, stmt) in state.statements.drain() {
                    conn.close_statement(stmt);
                }
            }
            Err(e) => {
                tracing::warn!(table = %self.spec.name(), error = %e, "Unable to close statements");
                state.statements.clear();
            }
        }
    }
}

fn into_sql_error(err: DatabaseError) -> SqlError {
    match err {
        DatabaseError::Sql(e) => e,
        other => SqlError::other(other.to_string()),
    }
}
