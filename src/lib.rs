// CMS store
// Multi-dialect table gateways for the content backend: one registry per connection,
// tables created on startup for databases the application owns

pub mod db;
pub mod storage;

use db::{DatabaseConfig, DatabaseError, GatewayRegistry, TableReport};
use storage::{DocumentGateway, SettingsGateway};

/// The content store: registry plus the entity gateways wired to it
#[derive(Debug)]
pub struct CmsStore {
    registry: GatewayRegistry,
    pub settings: SettingsGateway,
    pub documents: DocumentGateway,
}

impl CmsStore {
    /// Open the configured database, register every gateway and bootstrap the schema
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let registry = GatewayRegistry::open(config)?;
        tracing::info!(
            database = %config.name,
            dialect = %config.dialect,
            internal = config.is_internal(),
            "Opening content store"
        );

        let settings = SettingsGateway::new(&registry)?;
        let documents = DocumentGateway::new(&registry)?;
        let store = Self {
            registry,
            settings,
            documents,
        };

        let reports = store.create_tables();
        let created = reports.iter().filter(|r| r.outcome.is_applied()).count();
        if created > 0 {
            tracing::info!(created, "Created missing tables");
        }
        if store.registry.has_missing_table() {
            tracing::warn!(tables = ?store.registry.table_names(), "Some tables are unavailable");
        } else {
            let seeded = store.settings.init_default_settings()?;
            if seeded > 0 {
                tracing::info!(seeded, "Seeded default settings");
            }
        }

        Ok(store)
    }

    /// Open the embedded database in the platform data directory
    pub fn open_default() -> Result<Self, DatabaseError> {
        let path = db::get_default_db_path()?;
        Self::open(&DatabaseConfig::sqlite("Local", path))
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn create_tables(&self) -> Vec<TableReport> {
        self.registry.create_tables()
    }

    /// Whether every table is present
    pub fn is_ready(&self) -> bool {
        !self.registry.has_missing_table()
    }

    /// Release cached statements; the connection closes when the store is dropped
    pub fn close(&self) {
        self.registry.close();
    }
}
