// Database Module
// Dialect modelling, table definitions, table gateways and the native drivers behind them

pub mod config;
pub mod dialect;
pub mod drivers;
pub mod gateway;
pub mod registry;
pub mod schema;
pub mod traits;

pub use config::{get_default_db_path, DatabaseConfig, DriverProfile};
pub use dialect::{Dialect, DialectProvider, ErrorPatterns};
pub use gateway::{Session, TableGateway, TableState, QUERY_TIMEOUT};
pub use registry::{GatewayRegistry, TableReport};
pub use schema::{ColumnSpec, IndexKind, IndexSpec, SqlType, TableSpec, TableSpecBuilder};
pub use traits::{
    CellValue, Connection, DatabaseError, InsertOutcome, Outcome, Row, SharedConnection,
    SqlError, SqlErrorKind, StatementId,
};
