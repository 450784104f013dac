// CMS storage
// Entity gateways built on the db layer: settings and content documents

pub mod documents;
pub mod settings;

use chrono::{DateTime, Utc};

use crate::db::traits::DatabaseError;

pub use documents::{CreateDocumentInput, Document, DocumentGateway, UpdateDocumentInput};
pub use settings::{Setting, SettingsGateway};

pub type StorageResult<T> = Result<T, DatabaseError>;

/// Current time at millisecond precision, the resolution every engine stores
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
