// Settings storage
// Persistent key-value settings in the cms_settings table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::{now_millis, StorageResult};
use crate::db::gateway::TableGateway;
use crate::db::registry::GatewayRegistry;
use crate::db::schema::{SqlType, TableSpecBuilder};
use crate::db::traits::{CellValue, InsertOutcome, Row};

pub const SETTINGS_TABLE: &str = "cms_settings";

const INSERT: &str =
    "INSERT INTO cms_settings (setting_key, setting_value, updated_at) VALUES (?, ?, ?)";
const UPDATE: &str = "UPDATE cms_settings SET setting_value = ?, updated_at = ? WHERE setting_key = ?";
const SELECT_ONE: &str =
    "SELECT setting_key, setting_value, updated_at FROM cms_settings WHERE setting_key = ?";
const SELECT_ALL: &str =
    "SELECT setting_key, setting_value, updated_at FROM cms_settings ORDER BY setting_key";
const DELETE: &str = "DELETE FROM cms_settings WHERE setting_key = ?";

pub const DEFAULT_SETTINGS: [(&str, &str); 3] = [
    ("page_size", "20"),
    ("comments_enabled", "true"),
    ("purge_stale_drafts", "true"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn define(table: TableSpecBuilder) -> TableSpecBuilder {
    table
        .sized_column("setting_key", SqlType::Varchar, 100, true)
        .column("setting_value", SqlType::LongVarchar, false)
        .column_with_default("updated_at", SqlType::Timestamp, 0, true, true)
        .primary_key("pk_cms_settings", &["setting_key"])
}

/// Gateway for application settings
#[derive(Debug, Clone)]
pub struct SettingsGateway {
    gateway: Arc<TableGateway>,
}

impl SettingsGateway {
    pub fn new(registry: &GatewayRegistry) -> StorageResult<Self> {
        Ok(Self {
            gateway: registry.gateway(SETTINGS_TABLE, define)?,
        })
    }

    pub fn gateway(&self) -> &TableGateway {
        &self.gateway
    }

    fn row_to_setting(&self, row: &Row) -> Option<Setting> {
        Some(Setting {
            key: row.get_string("setting_key")?,
            value: self.gateway.get_clob(row, "setting_value"),
            updated_at: row.get_timestamp("updated_at").unwrap_or_default(),
        })
    }

    /// Add a setting; an existing key is left untouched
    pub fn add(&self, key: &str, value: Option<&str>) -> StorageResult<Option<InsertOutcome>> {
        let params = [CellValue::from(key), CellValue::from(value), now_millis().into()];
        self.gateway.insert("insert", INSERT, &params)
    }

    /// Update an existing setting; false when the key is unknown or the table not ready
    pub fn update(&self, key: &str, value: Option<&str>) -> StorageResult<bool> {
        let params = [CellValue::from(value), now_millis().into(), CellValue::from(key)];
        let updated = self.gateway.execute_update("update", UPDATE, &params)?;
        Ok(updated.unwrap_or(0) > 0)
    }

    /// Fetch by key, then add or update
    pub fn upsert(&self, key: &str, value: Option<&str>) -> StorageResult<bool> {
        if !self.gateway.has_connection() {
            return Ok(false);
        }
        if self.get_setting(key)?.is_some() {
            return self.update(key, value);
        }
        match self.add(key, value)? {
            Some(InsertOutcome::Inserted) => Ok(true),
            // Added by someone else in between
            Some(InsertOutcome::AlreadyExists) => self.update(key, value),
            None => Ok(false),
        }
    }

    pub fn get_setting(&self, key: &str) -> StorageResult<Option<Setting>> {
        let row = self.gateway.query_one("select_one", SELECT_ONE, &[key.into()])?;
        Ok(row.as_ref().and_then(|r| self.row_to_setting(r)))
    }

    /// Get a setting value by key
    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get_setting(key)?.and_then(|s| s.value))
    }

    /// Get a setting parsed into `T`; unparsable values read as unset
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> StorageResult<Option<T>> {
        Ok(self.get(key)?.and_then(|v| v.parse().ok()))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> StorageResult<bool> {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// All settings ordered by key
    pub fn list(&self) -> StorageResult<Vec<Setting>> {
        let rows = self.gateway.query_rows("select_all", SELECT_ALL, &[])?;
        Ok(rows.iter().filter_map(|r| self.row_to_setting(r)).collect())
    }

    /// Seed the default settings that are not set yet; returns how many were added
    pub fn init_default_settings(&self) -> StorageResult<usize> {
        let mut added = 0;
        for (key, value) in DEFAULT_SETTINGS {
            if self.add(key, Some(value))? == Some(InsertOutcome::Inserted) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Delete a setting; true if a row was removed
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        let deleted = self.gateway.execute_update("delete", DELETE, &[key.into()])?;
        Ok(deleted.unwrap_or(0) > 0)
    }
}
