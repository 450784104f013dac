// Document storage
// Content documents with text body, binary attachment and publication flag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{now_millis, StorageResult};
use crate::db::gateway::TableGateway;
use crate::db::registry::GatewayRegistry;
use crate::db::schema::{SqlType, TableSpecBuilder};
use crate::db::traits::{CellValue, InsertOutcome, Row};

pub const DOCUMENTS_TABLE: &str = "cms_documents";

const COLUMNS: &str = "id, title, body, attachment, published, created_at, updated_at";

const INSERT: &str = "INSERT INTO cms_documents (id, title, body, attachment, published, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)";
const UPDATE: &str = "UPDATE cms_documents SET title = ?, body = ?, attachment = ?, published = ?, updated_at = ? WHERE id = ?";
const DELETE: &str = "DELETE FROM cms_documents WHERE id = ?";
const COUNT: &str = "SELECT COUNT(*) AS total FROM cms_documents";

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub attachment: Option<Vec<u8>>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDocumentInput {
    pub title: String,
    pub body: Option<String>,
    pub attachment: Option<Vec<u8>>,
    pub published: bool,
}

/// Input for updating an existing document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDocumentInput {
    pub title: Option<String>,
    pub body: Option<String>,
    pub attachment: Option<Vec<u8>>,
    pub published: Option<bool>,
}

impl Document {
    pub fn new(input: CreateDocumentInput) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            body: input.body,
            attachment: input.attachment,
            published: input.published,
            created_at: now,
            updated_at: now,
        }
    }
}

fn define(table: TableSpecBuilder) -> TableSpecBuilder {
    table
        .sized_column("id", SqlType::Varchar, 36, true)
        .sized_column("title", SqlType::Varchar, 255, true)
        .column("body", SqlType::LongVarchar, false)
        .column("attachment", SqlType::VarBinary, false)
        .column_with_default("published", SqlType::Boolean, 0, true, true)
        .column("created_at", SqlType::Timestamp, true)
        .column_with_default("updated_at", SqlType::Timestamp, 0, true, true)
        .primary_key("pk_cms_documents", &["id"])
        .index("idx_cms_documents_title", &["title"])
}

/// Gateway for content documents
#[derive(Debug, Clone)]
pub struct DocumentGateway {
    gateway: Arc<TableGateway>,
    select_all: String,
    select_one: String,
    select_by_title: String,
    purge_stale: String,
}

impl DocumentGateway {
    pub fn new(registry: &GatewayRegistry) -> StorageResult<Self> {
        let gateway = registry.gateway(DOCUMENTS_TABLE, define)?;
        let yesterday = gateway.provider().yesterday_date();

        Ok(Self {
            gateway,
            select_all: format!("SELECT {} FROM cms_documents ORDER BY created_at, id", COLUMNS),
            select_one: format!("SELECT {} FROM cms_documents WHERE id = ?", COLUMNS),
            select_by_title: format!(
                "SELECT {} FROM cms_documents WHERE title = ? ORDER BY created_at, id",
                COLUMNS
            ),
            purge_stale: format!(
                "DELETE FROM cms_documents WHERE published = ? AND updated_at < {}",
                yesterday
            ),
        })
    }

    pub fn gateway(&self) -> &TableGateway {
        &self.gateway
    }

    fn row_to_document(&self, row: &Row) -> Option<Document> {
        Some(Document {
            id: row.get_string("id")?,
            title: row.get_string("title").unwrap_or_default(),
            body: self.gateway.get_clob(row, "body"),
            attachment: self.gateway.get_blob(row, "attachment"),
            published: row.get_bool("published").unwrap_or(false),
            created_at: row.get_timestamp("created_at").unwrap_or_default(),
            updated_at: row.get_timestamp("updated_at").unwrap_or_default(),
        })
    }

    fn optional_blob(value: &Option<Vec<u8>>) -> CellValue {
        value.clone().map(CellValue::Binary).unwrap_or(CellValue::Null)
    }

    /// Insert a document as given; an existing id is reported, not overwritten
    pub fn add(&self, doc: &Document) -> StorageResult<Option<InsertOutcome>> {
        let params = [
            CellValue::from(doc.id.as_str()),
            CellValue::from(doc.title.as_str()),
            CellValue::from(doc.body.clone()),
            Self::optional_blob(&doc.attachment),
            self.gateway.bool_value(doc.published),
            doc.created_at.into(),
            doc.updated_at.into(),
        ];
        self.gateway.insert("insert", INSERT, &params)
    }

    /// Create a new document with a fresh id
    pub fn create(&self, input: CreateDocumentInput) -> StorageResult<Option<Document>> {
        let doc = Document::new(input);
        match self.add(&doc)? {
            Some(InsertOutcome::Inserted) => Ok(Some(doc)),
            _ => Ok(None),
        }
    }

    /// Write every field of an existing document
    pub fn update(&self, doc: &Document) -> StorageResult<bool> {
        let params = [
            CellValue::from(doc.title.as_str()),
            CellValue::from(doc.body.clone()),
            Self::optional_blob(&doc.attachment),
            self.gateway.bool_value(doc.published),
            doc.updated_at.into(),
            CellValue::from(doc.id.as_str()),
        ];
        let updated = self.gateway.execute_update("update", UPDATE, &params)?;
        Ok(updated.unwrap_or(0) > 0)
    }

    /// Apply a partial update and stamp `updated_at`
    pub fn modify(&self, id: &str, input: UpdateDocumentInput) -> StorageResult<Option<Document>> {
        let Some(mut doc) = self.get_by_id(id)? else {
            return Ok(None);
        };

        if let Some(title) = input.title {
            doc.title = title;
        }
        if input.body.is_some() {
            doc.body = input.body;
        }
        if input.attachment.is_some() {
            doc.attachment = input.attachment;
        }
        if let Some(published) = input.published {
            doc.published = published;
        }
        doc.updated_at = now_millis();

        Ok(if self.update(&doc)? { Some(doc) } else { None })
    }

    /// Fetch by id, then add or update
    pub fn upsert(&self, doc: &Document) -> StorageResult<bool> {
        if !self.gateway.has_connection() {
            return Ok(false);
        }
        if self.get_by_id(&doc.id)?.is_some() {
            return self.update(doc);
        }
        match self.add(doc)? {
            Some(InsertOutcome::Inserted) => Ok(true),
            Some(InsertOutcome::AlreadyExists) => self.update(doc),
            None => Ok(false),
        }
    }

    pub fn get_by_id(&self, id: &str) -> StorageResult<Option<Document>> {
        let row = self.gateway.query_one("select_one", &self.select_one, &[id.into()])?;
        Ok(row.as_ref().and_then(|r| self.row_to_document(r)))
    }

    /// Documents with the given title, oldest first
    pub fn find_by_title(&self, title: &str) -> StorageResult<Vec<Document>> {
        let rows = self
            .gateway
            .query_rows("select_by_title", &self.select_by_title, &[title.into()])?;
        Ok(rows.iter().filter_map(|r| self.row_to_document(r)).collect())
    }

    /// All documents, oldest first
    pub fn list(&self) -> StorageResult<Vec<Document>> {
        if !self.gateway.has_connection() {
            return Ok(Vec::new());
        }
        self.gateway.pre_query()?;
        let rows = self.gateway.query_rows("select_all", &self.select_all, &[]);
        self.gateway.post_query()?;

        Ok(rows?.iter().filter_map(|r| self.row_to_document(r)).collect())
    }

    pub fn delete(&self, id: &str) -> StorageResult<bool> {
        let deleted = self.gateway.execute_update("delete", DELETE, &[id.into()])?;
        Ok(deleted.unwrap_or(0) > 0)
    }

    /// Number of stored documents; `None` when the table is not ready
    pub fn count(&self) -> StorageResult<Option<i64>> {
        if !self.gateway.has_connection() {
            return Ok(None);
        }
        let row = self.gateway.query_one("count", COUNT, &[])?;
        Ok(Some(row.and_then(|r| r.get_i64("total")).unwrap_or(0)))
    }

    /// Delete unpublished drafts not touched since yesterday
    pub fn purge_stale(&self) -> StorageResult<u64> {
        let params = [self.gateway.bool_value(false)];
        let deleted = self
            .gateway
            .execute_update("purge_stale", &self.purge_stale, &params)?
            .unwrap_or(0);
        if deleted > 0 {
            tracing::info!(table = DOCUMENTS_TABLE, deleted, "Purged stale drafts");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::DatabaseConfig;
    use chrono::Duration;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn create_test_db() -> (GatewayRegistry, DocumentGateway, PathBuf) {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = std::env::temp_dir().join(format!(
            "cms_documents_test_{}_{}.db",
            std::process::id(),
            counter
        ));
        let _ = std::fs::remove_file(&db_path);

        let registry = GatewayRegistry::open(&DatabaseConfig::sqlite("Test", &db_path)).unwrap();
        let documents = DocumentGateway::new(&registry).unwrap();
        registry.create_tables();
        (registry, documents, db_path)
    }

    fn draft(title: &str) -> CreateDocumentInput {
        CreateDocumentInput {
            title: title.to_string(),
            body: Some(format!("Body of {}", title)),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let (_registry, documents, db_path) = create_test_db();

        let doc = documents
            .create(CreateDocumentInput {
                title: "Welcome".to_string(),
                body: Some("Hello".to_string()),
                attachment: Some(vec![0, 1, 2, 255]),
                published: true,
            })
            .unwrap()
            .unwrap();

        let loaded = documents.get_by_id(&doc.id).unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert!(loaded.published);
        assert_eq!(loaded.attachment, Some(vec![0, 1, 2, 255]));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_add_twice_keeps_first() {
        let (registry, documents, db_path) = create_test_db();
        let doc = Document::new(draft("First"));

        assert_eq!(documents.add(&doc).unwrap(), Some(InsertOutcome::Inserted));
        let mut again = doc.clone();
        again.title = "Second".to_string();
        assert_eq!(documents.add(&again).unwrap(), Some(InsertOutcome::AlreadyExists));

        assert!(documents.gateway().has_table());
        assert!(!registry.has_missing_table());
        assert_eq!(documents.get_by_id(&doc.id).unwrap().unwrap().title, "First");

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_upsert() {
        let (_registry, documents, db_path) = create_test_db();
        let mut doc = Document::new(draft("Draft"));

        assert!(documents.upsert(&doc).unwrap());
        doc.title = "Final".to_string();
        doc.published = true;
        assert!(documents.upsert(&doc).unwrap());

        let loaded = documents.get_by_id(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Final");
        assert!(loaded.published);
        assert_eq!(documents.count().unwrap(), Some(1));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_modify_partial() {
        let (_registry, documents, db_path) = create_test_db();
        let doc = documents.create(draft("Draft")).unwrap().unwrap();

        let modified = documents
            .modify(
                &doc.id,
                UpdateDocumentInput {
                    published: Some(true),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(modified.published);
        assert_eq!(modified.title, "Draft");
        assert_eq!(modified.body, doc.body);
        assert!(modified.updated_at >= doc.updated_at);

        assert!(documents.modify("missing", UpdateDocumentInput::default()).unwrap().is_none());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_list_find_and_delete() {
        let (_registry, documents, db_path) = create_test_db();
        let a = documents.create(draft("Alpha")).unwrap().unwrap();
        documents.create(draft("Beta")).unwrap().unwrap();
        documents.create(draft("Alpha")).unwrap().unwrap();

        assert_eq!(documents.list().unwrap().len(), 3);
        assert_eq!(documents.find_by_title("Alpha").unwrap().len(), 2);
        assert!(documents.find_by_title("Gamma").unwrap().is_empty());

        assert!(documents.delete(&a.id).unwrap());
        assert!(!documents.delete(&a.id).unwrap());
        assert_eq!(documents.count().unwrap(), Some(2));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_purge_stale_drafts() {
        let (_registry, documents, db_path) = create_test_db();

        let mut old_draft = Document::new(draft("Old draft"));
        old_draft.updated_at = old_draft.updated_at - Duration::days(2);
        let mut old_published = Document::new(draft("Old post"));
        old_published.published = true;
        old_published.updated_at = old_published.updated_at - Duration::days(2);
        let fresh = Document::new(draft("Fresh"));

        for doc in [&old_draft, &old_published, &fresh] {
            documents.add(doc).unwrap();
        }

        assert_eq!(documents.purge_stale().unwrap(), 1);
        assert!(documents.get_by_id(&old_draft.id).unwrap().is_none());
        assert!(documents.get_by_id(&old_published.id).unwrap().is_some());
        assert!(documents.get_by_id(&fresh.id).unwrap().is_some());

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_reads_without_table() {
        let registry = GatewayRegistry::detached(crate::db::config::DriverProfile::new(
            crate::db::dialect::Dialect::Sqlite,
        ));
        let documents = DocumentGateway::new(&registry).unwrap();

        assert!(documents.get_by_id("x").unwrap().is_none());
        assert!(documents.list().unwrap().is_empty());
        assert_eq!(documents.count().unwrap(), None);
        assert_eq!(documents.purge_stale().unwrap(), 0);
        assert!(documents.create(draft("Nowhere")).unwrap().is_none());
    }

    #[test]
    fn test_schema_shape() {
        let registry = GatewayRegistry::detached(crate::db::config::DriverProfile::new(
            crate::db::dialect::Dialect::Postgresql,
        ));
        let documents = DocumentGateway::new(&registry).unwrap();
        let gateway = documents.gateway();

        assert_eq!(
            gateway.spec().table_sql(gateway.provider()),
            "CREATE TABLE cms_documents (id VARCHAR(36) NOT NULL, title VARCHAR(255) NOT NULL, \
             body TEXT, attachment BYTEA, published BOOLEAN NOT NULL DEFAULT FALSE, \
             created_at TIMESTAMP NOT NULL, updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             CONSTRAINT pk_cms_documents PRIMARY KEY (id))"
        );
        assert_eq!(
            gateway.spec().indices_sql(gateway.provider()),
            vec!["CREATE INDEX idx_cms_documents_title ON cms_documents(title)".to_string()]
        );
    }
}
