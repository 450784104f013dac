// Gateway Registry
// Owns every table gateway bound to one connection and drives schema bootstrap

use std::sync::{Arc, PoisonError, RwLock};

use crate::db::config::{DatabaseConfig, DriverProfile};
use crate::db::dialect::DialectProvider;
use crate::db::drivers;
use crate::db::gateway::{Session, TableGateway};
use crate::db::schema::TableSpecBuilder;
use crate::db::traits::{DatabaseError, Outcome, SharedConnection, SqlError};

/// Result of bootstrapping one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub table: String,
    pub outcome: Outcome,
}

/// Registry of the gateways sharing one connection
///
/// The connection belongs to the caller; closing the registry only releases
/// gateway statements.
#[derive(Debug)]
pub struct GatewayRegistry {
    session: Session,
    gateways: RwLock<Vec<Arc<TableGateway>>>,
}

impl GatewayRegistry {
    pub fn new(driver: DriverProfile, connection: SharedConnection) -> Self {
        Self {
            session: Session::new(driver, Some(connection)),
            gateways: RwLock::new(Vec::new()),
        }
    }

    /// Registry without a connection; its gateways never report ready
    pub fn detached(driver: DriverProfile) -> Self {
        Self {
            session: Session::new(driver, None),
            gateways: RwLock::new(Vec::new()),
        }
    }

    /// Open a connection for the config and bind a registry to it
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let driver = DriverProfile::from_config(config);
        let connection = drivers::connect(config)?;
        Ok(Self::new(driver, connection))
    }

    pub fn driver(&self) -> &DriverProfile {
        self.session.driver()
    }

    pub fn provider(&self) -> &DialectProvider {
        self.session.provider()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Build a gateway on this registry's session and register it
    ///
    /// A gateway already registered under the same table name is returned as is.
    pub fn gateway<F>(&self, name: &str, define: F) -> Result<Arc<TableGateway>, DatabaseError>
    where
        F: FnOnce(TableSpecBuilder) -> TableSpecBuilder,
    {
        if let Ok(existing) = self.get_gateway(name) {
            return Ok(existing);
        }
        let gateway = Arc::new(TableGateway::new(self.session.clone(), name, define)?);
        self.register(Arc::clone(&gateway));
        Ok(gateway)
    }

    /// Add a gateway unless one for the same table is already registered
    pub fn register(&self, gateway: Arc<TableGateway>) -> bool {
        let mut gateways = self.gateways.write().unwrap_or_else(PoisonError::into_inner);
        if gateways
            .iter()
            .any(|g| g.table_name() == gateway.table_name())
        {
            tracing::debug!(table = %gateway.table_name(), "Gateway already registered");
            return false;
        }
        tracing::info!(table = %gateway.table_name(), "Registered gateway");
        gateways.push(gateway);
        true
    }

    /// Get a gateway by table name
    pub fn get_gateway(&self, name: &str) -> Result<Arc<TableGateway>, DatabaseError> {
        let table_name = self.provider().fold_identifier(name);
        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        gateways
            .iter()
            .find(|g| g.table_name() == table_name)
            .cloned()
            .ok_or(DatabaseError::GatewayNotFound(table_name))
    }

    /// Registered table names, in registration order
    pub fn table_names(&self) -> Vec<String> {
        let gateways = self.gateways.read().unwrap_or_else(PoisonError::into_inner);
        gateways.iter().map(|g| g.table_name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<TableGateway>> {
        self.gateways
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check every registered table, creating the missing ones where allowed
    pub fn create_tables(&self) -> Vec<TableReport> {
        let reports: Vec<TableReport> = self
            .snapshot()
            .iter()
            .map(|g| TableReport {
                table: g.table_name().to_string(),
                outcome: g.check_table(),
            })
            .collect();

        let failed = reports.iter().filter(|r| r.outcome.is_failed()).count();
        if failed > 0 {
            tracing::warn!(failed, total = reports.len(), "Schema bootstrap incomplete");
        }
        reports
    }

    /// True as soon as one registered gateway lacks its table
    pub fn has_missing_table(&self) -> bool {
        self.snapshot().iter().any(|g| !g.has_table())
    }

    /// Release gateway statements and forget every gateway
    pub fn close(&self) {
        let mut gateways = self.gateways.write().unwrap_or_else(PoisonError::into_inner);
        for gateway in gateways.iter() {
            gateway.close();
        }
        gateways.clear();
    }

    pub fn is_constraint_violation(&self, err: &SqlError) -> bool {
        self.driver().is_constraint_violation(err)
    }

    pub fn is_data_too_long(&self, err: &SqlError) -> bool {
        self.driver().is_data_too_long(err)
    }
}
