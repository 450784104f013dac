// Table Definitions
// Column, index and table descriptors that render themselves as dialect SQL

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::dialect::DialectProvider;
use crate::db::traits::DatabaseError;

/// Column type tag, mapped to a keyword by each dialect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SqlType {
    Varchar,
    Integer,
    Timestamp,
    Boolean,
    LongVarchar,
    VarBinary,
    BigInt,
    SmallInt,
    Char,
}

impl SqlType {
    pub fn ansi_name(&self) -> &'static str {
        match self {
            SqlType::Varchar => "VARCHAR",
            SqlType::Integer => "INTEGER",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Boolean => "BOOLEAN",
            SqlType::LongVarchar => "LONGVARCHAR",
            SqlType::VarBinary => "VARBINARY",
            SqlType::BigInt => "BIGINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Char => "CHAR",
        }
    }

    /// Types whose declaration takes a length
    pub fn is_sized(&self) -> bool {
        matches!(self, SqlType::Varchar | SqlType::Char)
    }
}

/// Represents a column of a table definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    /// Declared length, 0 when unspecified
    pub size: u32,
    pub required: bool,
    pub has_default: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: SqlType, size: u32, required: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size,
            required,
            has_default: false,
        }
    }

    /// Column definition as it appears inside CREATE TABLE
    ///
    /// Order is fixed: name, type, (size), NOT NULL, DEFAULT. Existing databases
    /// were created with exactly this shape.
    pub fn render_definition(&self, provider: &DialectProvider) -> String {
        let name = if provider.is_reserved_word(&self.name) {
            provider.quote_identifier(&self.name)
        } else {
            self.name.clone()
        };

        let type_name = provider.type_name(self.sql_type);
        let mut sql = format!("{} {}", name, type_name);

        if self.size > 0 && self.sql_type.is_sized() && !type_name.contains('(') {
            sql.push_str(&format!("({})", self.size));
        }
        if self.required {
            sql.push_str(" NOT NULL");
        }
        if self.has_default {
            if let Some(literal) = provider.default_value(self.sql_type) {
                sql.push_str(" DEFAULT ");
                sql.push_str(literal);
            }
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    Index,
    PrimaryKey,
}

/// Represents an index or primary key of a table definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    /// Empty for primary keys, which are rendered inline
    pub table_name: String,
    pub columns: Vec<String>,
}

impl IndexSpec {
    pub fn primary_key(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::PrimaryKey,
            table_name: String::new(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn index(name: impl Into<String>, table_name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Index,
            table_name: table_name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.kind == IndexKind::PrimaryKey
    }

    /// Inline constraint for primary keys, standalone CREATE INDEX otherwise
    pub fn render_create_statement(&self) -> String {
        let columns = self.columns.join(", ");
        match self.kind {
            IndexKind::PrimaryKey => {
                format!("CONSTRAINT {} PRIMARY KEY ({})", self.name, columns)
            }
            IndexKind::Index => {
                format!("CREATE INDEX {} ON {}({})", self.name, self.table_name, columns)
            }
        }
    }
}

/// Schema definition of one table; built once, never mutated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    name: String,
    columns: Vec<ColumnSpec>,
    indices: Vec<IndexSpec>,
}

impl TableSpec {
    pub fn builder(name: impl Into<String>) -> TableSpecBuilder {
        TableSpecBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn indices(&self) -> &[IndexSpec] {
        &self.indices
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&IndexSpec> {
        self.indices.iter().find(|i| i.is_primary_key())
    }

    /// CREATE TABLE statement, primary key constraint last
    pub fn table_sql(&self, provider: &DialectProvider) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.render_definition(provider))
            .collect();
        if let Some(pk) = self.primary_key() {
            parts.push(provider.quote_reserved_words(&pk.render_create_statement()));
        }

        let name = if provider.is_reserved_word(&self.name) {
            provider.quote_identifier(&self.name)
        } else {
            self.name.clone()
        };
        format!("CREATE TABLE {} ({})", name, parts.join(", "))
    }

    /// CREATE INDEX statements for the secondary indices, in declaration order
    pub fn indices_sql(&self, provider: &DialectProvider) -> Vec<String> {
        self.indices
            .iter()
            .filter(|i| !i.is_primary_key())
            .map(|i| provider.quote_reserved_words(&i.render_create_statement()))
            .collect()
    }
}

/// Accumulates columns and indices, then validates them into a [`TableSpec`]
#[derive(Debug, Clone)]
pub struct TableSpecBuilder {
    name: String,
    columns: Vec<ColumnSpec>,
    indices: Vec<IndexSpec>,
}

impl TableSpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(self, name: &str, sql_type: SqlType, required: bool) -> Self {
        self.column_with_default(name, sql_type, 0, required, false)
    }

    pub fn sized_column(self, name: &str, sql_type: SqlType, size: u32, required: bool) -> Self {
        self.column_with_default(name, sql_type, size, required, false)
    }

    pub fn column_with_default(
        mut self,
        name: &str,
        sql_type: SqlType,
        size: u32,
        required: bool,
        has_default: bool,
    ) -> Self {
        let mut column = ColumnSpec::new(name, sql_type, size, required);
        column.has_default = has_default;
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, name: &str, columns: &[&str]) -> Self {
        self.indices.push(IndexSpec::primary_key(name, columns));
        self
    }

    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        let table = self.name.clone();
        self.indices.push(IndexSpec::index(name, table, columns));
        self
    }

    pub fn build(self) -> Result<TableSpec, DatabaseError> {
        if self.name.is_empty() {
            return Err(DatabaseError::InvalidSchema("table name is required".to_string()));
        }
        if self.columns.is_empty() {
            return Err(DatabaseError::InvalidSchema(format!(
                "table {} has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(DatabaseError::InvalidSchema(format!(
                    "table {} has a column without a name",
                    self.name
                )));
            }
            if !seen.insert(column.name.to_lowercase()) {
                return Err(DatabaseError::InvalidSchema(format!(
                    "duplicate column {} in table {}",
                    column.name, self.name
                )));
            }
        }

        if self.indices.iter().filter(|i| i.is_primary_key()).count() > 1 {
            return Err(DatabaseError::InvalidSchema(format!(
                "table {} declares more than one primary key",
                self.name
            )));
        }

        for index in &self.indices {
            if index.columns.is_empty() {
                return Err(DatabaseError::InvalidSchema(format!(
                    "index {} on {} has no columns",
                    index.name, self.name
                )));
            }
            if let Some(missing) = index
                .columns
                .iter()
                .find(|c| !seen.contains(&c.to_lowercase()))
            {
                return Err(DatabaseError::InvalidSchema(format!(
                    "index {} references unknown column {}",
                    index.name, missing
                )));
            }
        }

        Ok(TableSpec {
            name: self.name,
            columns: self.columns,
            indices: self.indices,
        })
    }
}
