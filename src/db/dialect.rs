// SQL Dialect Providers
// One configuration block per database engine: type keywords, default literals,
// reserved words, error classification and date literals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::db::schema::SqlType;
use crate::db::traits::{CellValue, DatabaseError, SqlError, SqlErrorKind, STATEMENT_NOT_EXECUTING};

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Derby,
    Db2,
    H2,
    Postgresql,
    Hsqldb,
    Mysql,
    Oracle,
    #[serde(alias = "mssql")]
    SqlServer,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 9] = [
        Dialect::Derby,
        Dialect::Db2,
        Dialect::H2,
        Dialect::Postgresql,
        Dialect::Hsqldb,
        Dialect::Mysql,
        Dialect::Oracle,
        Dialect::SqlServer,
        Dialect::Sqlite,
    ];

    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::Derby => "Apache Derby",
            Dialect::Db2 => "IBM DB2",
            Dialect::H2 => "H2",
            Dialect::Postgresql => "PostgreSQL",
            Dialect::Hsqldb => "HSQLDB",
            Dialect::Mysql => "MySQL",
            Dialect::Oracle => "Oracle",
            Dialect::SqlServer => "Microsoft SQL Server",
            Dialect::Sqlite => "SQLite",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            Dialect::Derby => 1527,
            Dialect::Db2 => 50000,
            Dialect::H2 => 9092,
            Dialect::Postgresql => 5432,
            Dialect::Hsqldb => 9001,
            Dialect::Mysql => 3306,
            Dialect::Oracle => 1521,
            Dialect::SqlServer => 1433,
            Dialect::Sqlite => 0, // File-based, no port
        }
    }

    /// Engines usually run in-process against a local file
    pub fn is_file_based(&self) -> bool {
        matches!(
            self,
            Dialect::Derby | Dialect::H2 | Dialect::Hsqldb | Dialect::Sqlite
        )
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "derby" => Ok(Dialect::Derby),
            "db2" => Ok(Dialect::Db2),
            "h2" => Ok(Dialect::H2),
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            "hsqldb" => Ok(Dialect::Hsqldb),
            "mysql" => Ok(Dialect::Mysql),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(DatabaseError::InvalidConfig(format!(
                "Unknown database type: {}",
                other
            ))),
        }
    }
}

/// Text and SQLSTATE signals used to classify driver errors
///
/// Message patterns are matched case-insensitively as substrings. Driver upgrades
/// change wording, so every list can be replaced per deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPatterns {
    pub constraint_violation: Vec<String>,
    pub constraint_states: Vec<String>,
    /// Trust the driver's typed integrity-constraint error
    pub typed_constraint: bool,
    pub data_too_long: Vec<String>,
    pub data_too_long_states: Vec<String>,
    pub tablespace: Vec<String>,
    pub invalid_column: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn message_matches(patterns: &[String], err: &SqlError) -> bool {
    let message = err.message.to_lowercase();
    patterns
        .iter()
        .any(|p| !p.is_empty() && message.contains(&p.to_lowercase()))
}

fn state_matches(states: &[String], err: &SqlError) -> bool {
    err.sql_state
        .as_deref()
        .map(|state| states.iter().any(|s| s == state))
        .unwrap_or(false)
}

const DAY_MONTH_YEAR: &str = "%d-%m-%Y %H:%M:%S";
const ORACLE_MASK: &str = "DD-MM-YYYY HH24:MI:SS";

/// Per-engine SQL strategy, built once per driver and shared by its gateways
#[derive(Debug, Clone)]
pub struct DialectProvider {
    dialect: Dialect,
    case_sensitive: bool,
    use_integer_for_boolean: bool,
    use_string_for_clob: bool,
    use_bytes_for_blob: bool,
    close_on_exception: bool,
    type_names: HashMap<SqlType, String>,
    defaults: HashMap<SqlType, String>,
    reserved_words: BTreeSet<String>,
    patterns: ErrorPatterns,
}

impl DialectProvider {
    pub fn new(dialect: Dialect) -> Self {
        let mut provider = Self {
            dialect,
            case_sensitive: true,
            use_integer_for_boolean: false,
            use_string_for_clob: false,
            use_bytes_for_blob: false,
            close_on_exception: false,
            type_names: HashMap::new(),
            defaults: HashMap::new(),
            reserved_words: BTreeSet::new(),
            patterns: ErrorPatterns::default(),
        };
        provider.define_types();
        provider.define_patterns();
        provider
    }

    /// Fill the type and default maps: ANSI-ish base, then the engine's divergences
    fn define_types(&mut self) {
        use SqlType::*;

        let base = [
            (Varchar, "VARCHAR"),
            (SmallInt, "SMALLINT"),
            (Integer, "INTEGER"),
            (BigInt, "BIGINT"),
            (Char, "CHAR(1)"),
            (Timestamp, "TIMESTAMP"),
            (Boolean, "BOOLEAN"),
            (LongVarchar, "CLOB"),
            (VarBinary, "BLOB"),
        ];
        for (sql_type, name) in base {
            self.type_names.insert(sql_type, name.to_string());
        }

        let defaults = [
            (Varchar, "''"),
            (Char, "'N'"),
            (SmallInt, "0"),
            (Integer, "0"),
            (BigInt, "0"),
            (Timestamp, "CURRENT_TIMESTAMP"),
            (Boolean, "FALSE"),
        ];
        for (sql_type, literal) in defaults {
            self.defaults.insert(sql_type, literal.to_string());
        }

        match self.dialect {
            Dialect::Derby => {
                self.use_integer_for_boolean = true;
                self.set_type(Boolean, "SMALLINT");
            }
            Dialect::Db2 => {
                self.use_integer_for_boolean = true;
                self.set_type(Boolean, "SMALLINT");
                self.add_reserved_word("ATTRIBUTES");
            }
            Dialect::H2 => {}
            Dialect::Postgresql => {
                self.case_sensitive = false;
                self.use_string_for_clob = true;
                self.use_bytes_for_blob = true;
                self.set_type(LongVarchar, "TEXT");
                self.set_type(VarBinary, "BYTEA");
            }
            Dialect::Hsqldb => {}
            Dialect::Mysql => {
                self.case_sensitive = false;
                self.use_integer_for_boolean = true;
                self.set_type(Timestamp, "DATETIME");
                self.set_type(Boolean, "TINYINT(1)");
                self.set_type(LongVarchar, "LONGTEXT");
                self.set_type(VarBinary, "LONGBLOB");
            }
            Dialect::Oracle => {
                self.use_integer_for_boolean = true;
                self.set_type(Varchar, "VARCHAR2");
                self.set_type(Timestamp, "DATE");
                self.set_type(SmallInt, "NUMBER(5,0)");
                self.set_type(Integer, "NUMBER(10,0)");
                self.set_type(BigInt, "NUMBER(19,0)");
                self.set_type(Boolean, "SMALLINT");
                self.set_default(Timestamp, "SYSDATE");
            }
            Dialect::SqlServer => {
                self.use_integer_for_boolean = true;
                self.set_type(Timestamp, "DATETIME2");
                self.set_type(Boolean, "BIT");
                self.set_type(LongVarchar, "VARCHAR(MAX)");
                self.set_type(VarBinary, "VARBINARY(MAX)");
                self.set_default(Timestamp, "GETDATE()");
                self.add_reserved_word("PERCENT");
            }
            Dialect::Sqlite => {
                self.use_integer_for_boolean = true;
                self.use_string_for_clob = true;
                self.use_bytes_for_blob = true;
                self.close_on_exception = true;
                self.set_type(LongVarchar, "TEXT");
                // Timestamps are stored as epoch millis
                self.set_type(Timestamp, "BIGINT");
                self.set_default(Timestamp, "0");
            }
        }

        if self.use_integer_for_boolean {
            self.set_default(Boolean, "0");
        }
    }

    fn define_patterns(&mut self) {
        let too_long_state = strings(&["22001"]);
        self.patterns = match self.dialect {
            Dialect::Derby => ErrorPatterns {
                constraint_violation: strings(&["duplicate key value", "violation"]),
                constraint_states: strings(&["23505"]),
                data_too_long: strings(&["truncation error"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["no space left", "disk is full"]),
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::Db2 => ErrorPatterns {
                typed_constraint: true,
                data_too_long: strings(&["sqlcode=-302", "value too long"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["sqlcode=-289", "table space", "tablespace"]),
                invalid_column: strings(&["column", "parameter index"]),
                ..ErrorPatterns::default()
            },
            Dialect::H2 => ErrorPatterns {
                constraint_violation: strings(&["violation"]),
                constraint_states: strings(&["23505"]),
                data_too_long: strings(&["value too long"]),
                data_too_long_states: too_long_state,
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::Postgresql => ErrorPatterns {
                constraint_violation: strings(&["violates"]),
                constraint_states: strings(&["23505"]),
                data_too_long: strings(&["value too long"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["could not extend file", "no space left on device"]),
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::Hsqldb => ErrorPatterns {
                typed_constraint: true,
                data_too_long: strings(&["right truncation"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["data file size limit", "is full"]),
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::Mysql => ErrorPatterns {
                typed_constraint: true,
                data_too_long: strings(&["data too long"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["is full"]),
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::Oracle => ErrorPatterns {
                constraint_violation: strings(&["ora-00001", "violated", "violation"]),
                data_too_long: strings(&["bigger than max size", "value too large"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["ora-01653", "ora-01654", "unable to extend"]),
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
            Dialect::SqlServer => ErrorPatterns {
                constraint_violation: strings(&["violation"]),
                constraint_states: strings(&["23000"]),
                data_too_long: strings(&["bigger than max size", "would be truncated"]),
                data_too_long_states: too_long_state,
                tablespace: strings(&["is full"]),
                invalid_column: strings(&["column", "out of range"]),
                ..ErrorPatterns::default()
            },
            Dialect::Sqlite => ErrorPatterns {
                // the driver reports this on statements left over from a failed insert
                constraint_violation: strings(&["constraint failed", STATEMENT_NOT_EXECUTING]),
                data_too_long: strings(&["value too long", "string or blob too big"]),
                data_too_long_states: too_long_state,
                invalid_column: strings(&["column"]),
                ..ErrorPatterns::default()
            },
        };
    }

    fn set_type(&mut self, sql_type: SqlType, name: &str) {
        self.type_names.insert(sql_type, name.to_string());
    }

    fn set_default(&mut self, sql_type: SqlType, literal: &str) {
        self.defaults.insert(sql_type, literal.to_string());
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Column type keyword for this engine
    pub fn type_name(&self, sql_type: SqlType) -> &str {
        self.type_names
            .get(&sql_type)
            .map(String::as_str)
            .unwrap_or_else(|| sql_type.ansi_name())
    }

    /// Literal used in a DEFAULT clause, if the type has one
    pub fn default_value(&self, sql_type: SqlType) -> Option<&str> {
        self.defaults.get(&sql_type).map(String::as_str)
    }

    /// False when the engine folds unquoted identifiers to lower case
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Fold an identifier the way the engine stores it
    pub fn fold_identifier(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    pub fn use_integer_for_boolean(&self) -> bool {
        self.use_integer_for_boolean
    }

    pub fn use_string_for_clob(&self) -> bool {
        self.use_string_for_clob
    }

    pub fn use_bytes_for_blob(&self) -> bool {
        self.use_bytes_for_blob
    }

    /// Whether a failed statement must be re-prepared before its next use
    pub fn close_on_exception(&self) -> bool {
        self.close_on_exception
    }

    /// Bind value for a boolean column
    pub fn boolean_value(&self, value: bool) -> CellValue {
        if self.use_integer_for_boolean {
            CellValue::Int(i64::from(value))
        } else {
            CellValue::Bool(value)
        }
    }

    pub fn error_patterns(&self) -> &ErrorPatterns {
        &self.patterns
    }

    pub fn error_patterns_mut(&mut self) -> &mut ErrorPatterns {
        &mut self.patterns
    }

    pub fn with_error_patterns(mut self, patterns: ErrorPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    /// Uniqueness or integrity rule failure
    pub fn is_constraint_violation(&self, err: &SqlError) -> bool {
        (self.patterns.typed_constraint && err.kind == SqlErrorKind::IntegrityConstraint)
            || state_matches(&self.patterns.constraint_states, err)
            || message_matches(&self.patterns.constraint_violation, err)
    }

    /// Value too large for its column
    pub fn is_data_too_long(&self, err: &SqlError) -> bool {
        err.kind == SqlErrorKind::DataTruncation
            || state_matches(&self.patterns.data_too_long_states, err)
            || message_matches(&self.patterns.data_too_long, err)
    }

    /// Storage exhausted; always false for engines without tablespaces
    pub fn is_tablespace_error(&self, err: &SqlError) -> bool {
        match self.dialect {
            Dialect::H2 | Dialect::Sqlite => false,
            _ => message_matches(&self.patterns.tablespace, err),
        }
    }

    /// Reference to a column the table does not have
    pub fn is_invalid_column_error(&self, err: &SqlError) -> bool {
        message_matches(&self.patterns.invalid_column, err)
    }

    /// SQL expression for the given instant (epoch millis, rendered in UTC)
    ///
    /// Returns `None` when `millis` is outside the representable date range.
    pub fn date_conversion(&self, millis: i64) -> Option<String> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| self.render_date(dt))
    }

    fn render_date(&self, dt: DateTime<Utc>) -> String {
        match self.dialect {
            Dialect::Derby => format!("TIMESTAMP('{}')", dt.format("%Y%m%d%H%M%S")),
            Dialect::Db2 | Dialect::Oracle => format!(
                "TO_DATE('{}','{}')",
                dt.format(DAY_MONTH_YEAR),
                ORACLE_MASK
            ),
            Dialect::Postgresql | Dialect::Hsqldb => format!(
                "TO_TIMESTAMP('{}','{}')",
                dt.format(DAY_MONTH_YEAR),
                ORACLE_MASK
            ),
            Dialect::H2 => format!(
                "PARSEDATETIME('{}','dd-MM-yyyy HH:mm:ss')",
                dt.format(DAY_MONTH_YEAR)
            ),
            Dialect::Mysql => format!(
                "STR_TO_DATE('{}','%d-%m-%Y %H:%i:%s')",
                dt.format(DAY_MONTH_YEAR)
            ),
            Dialect::SqlServer => format!(
                "CAST('{}' AS DATETIME2)",
                dt.format("%Y-%m-%d %H:%M:%S")
            ),
            Dialect::Sqlite => dt.timestamp_millis().to_string(),
        }
    }

    /// SQL expression for "now minus one day"
    pub fn yesterday_date(&self) -> String {
        match self.dialect {
            Dialect::Derby => "{fn TIMESTAMPADD(SQL_TSI_DAY, -1, CURRENT_TIMESTAMP)}".to_string(),
            Dialect::Db2 => "CURRENT TIMESTAMP - 1 DAY".to_string(),
            Dialect::H2 => "DATEADD('DAY', -1, CURRENT_TIMESTAMP)".to_string(),
            Dialect::Postgresql => "NOW() - INTERVAL '1 DAY'".to_string(),
            Dialect::Hsqldb => "CURRENT_TIMESTAMP - 1 DAY".to_string(),
            Dialect::Mysql => "DATE_SUB(NOW(), INTERVAL 1 DAY)".to_string(),
            Dialect::Oracle => "SYSDATE-1".to_string(),
            Dialect::SqlServer => "DATEADD(day, -1, GETDATE())".to_string(),
            Dialect::Sqlite => "(CAST(strftime('%s','now','-1 day') AS INTEGER)*1000)".to_string(),
        }
    }

    /// SQL expression for the Unix epoch
    pub fn zero_date(&self) -> String {
        self.render_date(DateTime::<Utc>::default())
    }

    pub fn is_reserved_word(&self, word: &str) -> bool {
        self.reserved_words.contains(word)
    }

    pub fn add_reserved_word(&mut self, word: &str) {
        if !word.is_empty() {
            self.reserved_words.insert(word.to_string());
        }
    }

    pub fn reserved_words(&self) -> impl Iterator<Item = &str> {
        self.reserved_words.iter().map(String::as_str)
    }

    /// Quote an identifier with the engine's delimiter
    pub fn quote_identifier(&self, name: &str) -> String {
        match self.dialect {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    fn is_quote_delimiter(&self, c: char) -> bool {
        c == '"'
            || match self.dialect {
                Dialect::Mysql => c == '`',
                Dialect::SqlServer => c == '[' || c == ']',
                _ => false,
            }
    }

    /// Quote every standalone occurrence of a registered reserved word
    ///
    /// Matching is case-sensitive and token based: words inside longer identifiers,
    /// already between delimiters or inside string literals are left alone.
    pub fn quote_reserved_words(&self, sql: &str) -> String {
        if self.reserved_words.is_empty() {
            return sql.to_string();
        }

        let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$';
        let mut out = String::with_capacity(sql.len() + 8);
        let mut chars = sql.char_indices().peekable();
        let mut prev: Option<char> = None;
        let mut in_literal = false;

        while let Some((start, c)) = chars.next() {
            if c == '\'' {
                in_literal = !in_literal;
            }
            if in_literal || c == '\'' || !is_ident(c) {
                out.push(c);
                prev = Some(c);
                continue;
            }

            let mut end = start + c.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if !is_ident(next) {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }

            let token = &sql[start..end];
            let following = sql[end..].chars().next();
            let quoted = prev.map(|p| self.is_quote_delimiter(p)).unwrap_or(false)
                && following.map(|f| self.is_quote_delimiter(f)).unwrap_or(false);

            if !quoted && self.reserved_words.contains(token) {
                out.push_str(&self.quote_identifier(token));
            } else {
                out.push_str(token);
            }
            prev = token.chars().last();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [SqlType; 9] = [
        SqlType::Varchar,
        SqlType::Integer,
        SqlType::Timestamp,
        SqlType::Boolean,
        SqlType::LongVarchar,
        SqlType::VarBinary,
        SqlType::BigInt,
        SqlType::SmallInt,
        SqlType::Char,
    ];

    fn unique_violation(dialect: Dialect) -> SqlError {
        match dialect {
            Dialect::Derby => SqlError::other(
                "The statement was aborted because it would have caused a duplicate key value in a unique or primary key constraint",
            )
            .with_state("23505"),
            Dialect::Db2 | Dialect::Hsqldb | Dialect::Mysql => SqlError::new(
                SqlErrorKind::IntegrityConstraint,
                "integrity constraint violation: unique constraint or index violation",
            ),
            Dialect::H2 => SqlError::other("Unique index or primary key violation: PUBLIC.PK_ITEMS"),
            Dialect::Postgresql => SqlError::other(
                "duplicate key value violates unique constraint \"items_pkey\"",
            )
            .with_state("23505"),
            Dialect::Oracle => SqlError::other("ORA-00001: unique constraint (APP.PK_ITEMS) violated"),
            Dialect::SqlServer => SqlError::other(
                "Violation of PRIMARY KEY constraint 'PK_items'. Cannot insert duplicate key",
            ),
            Dialect::Sqlite => SqlError::new(
                SqlErrorKind::IntegrityConstraint,
                "UNIQUE constraint failed: items.id",
            ),
        }
    }

    #[test]
    fn test_every_type_has_a_keyword() {
        for dialect in Dialect::ALL {
            let provider = DialectProvider::new(dialect);
            for sql_type in ALL_TYPES {
                assert!(
                    !provider.type_name(sql_type).is_empty(),
                    "{:?} has no keyword for {:?}",
                    dialect,
                    sql_type
                );
            }
        }
    }

    #[test]
    fn test_boolean_keywords() {
        let keyword = |d| DialectProvider::new(d).type_name(SqlType::Boolean).to_string();
        assert_eq!(keyword(Dialect::SqlServer), "BIT");
        assert_eq!(keyword(Dialect::Mysql), "TINYINT(1)");
        assert_eq!(keyword(Dialect::Derby), "SMALLINT");
        assert_eq!(keyword(Dialect::Db2), "SMALLINT");
        assert_eq!(keyword(Dialect::Oracle), "SMALLINT");
        assert_eq!(keyword(Dialect::H2), "BOOLEAN");
        assert_eq!(keyword(Dialect::Postgresql), "BOOLEAN");
    }

    #[test]
    fn test_divergent_type_keywords() {
        let mysql = DialectProvider::new(Dialect::Mysql);
        assert_eq!(mysql.type_name(SqlType::Timestamp), "DATETIME");

        let oracle = DialectProvider::new(Dialect::Oracle);
        assert_eq!(oracle.type_name(SqlType::Varchar), "VARCHAR2");
        assert_eq!(oracle.type_name(SqlType::Timestamp), "DATE");
        assert_eq!(oracle.type_name(SqlType::Integer), "NUMBER(10,0)");

        let mssql = DialectProvider::new(Dialect::SqlServer);
        assert_eq!(mssql.type_name(SqlType::LongVarchar), "VARCHAR(MAX)");

        assert_eq!(DialectProvider::new(Dialect::Postgresql).type_name(SqlType::LongVarchar), "TEXT");
        assert_eq!(DialectProvider::new(Dialect::Sqlite).type_name(SqlType::LongVarchar), "TEXT");
        assert_eq!(DialectProvider::new(Dialect::H2).type_name(SqlType::LongVarchar), "CLOB");
        assert_eq!(DialectProvider::new(Dialect::H2).type_name(SqlType::Char), "CHAR(1)");
    }

    #[test]
    fn test_boolean_defaults_follow_integer_flag() {
        assert_eq!(DialectProvider::new(Dialect::H2).default_value(SqlType::Boolean), Some("FALSE"));
        assert_eq!(DialectProvider::new(Dialect::Mysql).default_value(SqlType::Boolean), Some("0"));
        assert_eq!(DialectProvider::new(Dialect::H2).default_value(SqlType::LongVarchar), None);
        assert_eq!(
            DialectProvider::new(Dialect::Sqlite).boolean_value(true),
            CellValue::Int(1)
        );
        assert_eq!(
            DialectProvider::new(Dialect::Postgresql).boolean_value(true),
            CellValue::Bool(true)
        );
    }

    #[test]
    fn test_case_sensitivity() {
        for dialect in Dialect::ALL {
            let provider = DialectProvider::new(dialect);
            let expected = !matches!(dialect, Dialect::Mysql | Dialect::Postgresql);
            assert_eq!(provider.is_case_sensitive(), expected, "{:?}", dialect);
        }
        assert_eq!(DialectProvider::new(Dialect::Mysql).fold_identifier("Content"), "content");
        assert_eq!(DialectProvider::new(Dialect::Derby).fold_identifier("Content"), "Content");
    }

    #[test]
    fn test_constraint_violation_per_dialect() {
        let unrelated = SqlError::new(SqlErrorKind::Connection, "connection refused");
        for dialect in Dialect::ALL {
            let provider = DialectProvider::new(dialect);
            assert!(
                provider.is_constraint_violation(&unique_violation(dialect)),
                "{:?} missed its unique violation",
                dialect
            );
            assert!(
                !provider.is_constraint_violation(&unrelated),
                "{:?} misclassified connection refused",
                dialect
            );
        }
    }

    #[test]
    fn test_typed_dialects_ignore_message_text() {
        let mysql = DialectProvider::new(Dialect::Mysql);
        let untyped = SqlError::other("Duplicate entry '1' for key 'PRIMARY' violation");
        assert!(!mysql.is_constraint_violation(&untyped));
    }

    #[test]
    fn test_sqlite_statement_state_counts_as_violation() {
        let sqlite = DialectProvider::new(Dialect::Sqlite);
        assert!(sqlite.is_constraint_violation(&SqlError::statement_not_executing()));
    }

    #[test]
    fn test_data_too_long() {
        let mysql = DialectProvider::new(Dialect::Mysql);
        assert!(mysql.is_data_too_long(&SqlError::other("Data too long for column 'title' at row 1")));

        let pg = DialectProvider::new(Dialect::Postgresql);
        assert!(pg.is_data_too_long(&SqlError::other(
            "value too long for type character varying(10)"
        )));

        let oracle = DialectProvider::new(Dialect::Oracle);
        assert!(oracle.is_data_too_long(&SqlError::other(
            "the String being inserted is bigger than max size"
        )));

        let derby = DialectProvider::new(Dialect::Derby);
        assert!(derby.is_data_too_long(&SqlError::other("whatever").with_state("22001")));
        assert!(!derby.is_data_too_long(&SqlError::other("connection refused")));
    }

    #[test]
    fn test_tablespace_errors() {
        let full = SqlError::other("The table 'items' is full");
        assert!(DialectProvider::new(Dialect::Mysql).is_tablespace_error(&full));
        assert!(!DialectProvider::new(Dialect::H2).is_tablespace_error(&full));
        assert!(!DialectProvider::new(Dialect::Sqlite).is_tablespace_error(&full));

        let oracle = DialectProvider::new(Dialect::Oracle);
        assert!(oracle.is_tablespace_error(&SqlError::other(
            "ORA-01653: unable to extend table APP.ITEMS by 128 in tablespace USERS"
        )));
    }

    #[test]
    fn test_invalid_column() {
        let mssql = DialectProvider::new(Dialect::SqlServer);
        assert!(mssql.is_invalid_column_error(&SqlError::other("The index 7 is out of range.")));
        assert!(mssql.is_invalid_column_error(&SqlError::other("Invalid column name 'x'.")));

        let db2 = DialectProvider::new(Dialect::Db2);
        assert!(db2.is_invalid_column_error(&SqlError::other("Invalid parameter index 4")));

        let h2 = DialectProvider::new(Dialect::H2);
        assert!(!h2.is_invalid_column_error(&SqlError::other("The index 7 is out of range.")));
    }

    #[test]
    fn test_error_patterns_can_be_replaced() {
        let mut provider = DialectProvider::new(Dialect::Postgresql);
        let reworded = SqlError::other("duplicate key value breaks unique constraint");
        assert!(!provider.is_constraint_violation(&reworded));

        provider
            .error_patterns_mut()
            .constraint_violation
            .push("breaks unique".to_string());
        assert!(provider.is_constraint_violation(&reworded));

        let cleared = DialectProvider::new(Dialect::H2).with_error_patterns(ErrorPatterns::default());
        assert!(!cleared.is_constraint_violation(&unique_violation(Dialect::H2)));
    }

    #[test]
    fn test_date_conversion() {
        // 2024-03-05 14:07:09 UTC
        let millis = 1_709_647_629_000;
        let render = |d| DialectProvider::new(d).date_conversion(millis).unwrap();

        assert_eq!(render(Dialect::Derby), "TIMESTAMP('20240305140709')");
        assert_eq!(
            render(Dialect::Oracle),
            "TO_DATE('05-03-2024 14:07:09','DD-MM-YYYY HH24:MI:SS')"
        );
        assert_eq!(
            render(Dialect::Db2),
            "TO_DATE('05-03-2024 14:07:09','DD-MM-YYYY HH24:MI:SS')"
        );
        assert_eq!(
            render(Dialect::Postgresql),
            "TO_TIMESTAMP('05-03-2024 14:07:09','DD-MM-YYYY HH24:MI:SS')"
        );
        assert_eq!(
            render(Dialect::Hsqldb),
            "TO_TIMESTAMP('05-03-2024 14:07:09','DD-MM-YYYY HH24:MI:SS')"
        );
        assert_eq!(
            render(Dialect::H2),
            "PARSEDATETIME('05-03-2024 14:07:09','dd-MM-yyyy HH:mm:ss')"
        );
        assert_eq!(
            render(Dialect::Mysql),
            "STR_TO_DATE('05-03-2024 14:07:09','%d-%m-%Y %H:%i:%s')"
        );
        assert_eq!(render(Dialect::SqlServer), "CAST('2024-03-05 14:07:09' AS DATETIME2)");
        assert_eq!(render(Dialect::Sqlite), "1709647629000");
    }

    #[test]
    fn test_date_conversion_out_of_range() {
        for dialect in Dialect::ALL {
            assert_eq!(DialectProvider::new(dialect).date_conversion(i64::MAX), None);
        }
    }

    #[test]
    fn test_zero_and_yesterday() {
        assert_eq!(DialectProvider::new(Dialect::Derby).zero_date(), "TIMESTAMP('19700101000000')");
        assert_eq!(DialectProvider::new(Dialect::Sqlite).zero_date(), "0");
        for dialect in Dialect::ALL {
            assert!(!DialectProvider::new(dialect).yesterday_date().is_empty());
        }
        assert_eq!(DialectProvider::new(Dialect::Oracle).yesterday_date(), "SYSDATE-1");
    }

    #[test]
    fn test_default_reserved_words() {
        assert!(DialectProvider::new(Dialect::Db2).is_reserved_word("ATTRIBUTES"));
        assert!(DialectProvider::new(Dialect::SqlServer).is_reserved_word("PERCENT"));
        assert!(!DialectProvider::new(Dialect::H2).is_reserved_word("PERCENT"));
    }

    #[test]
    fn test_quote_reserved_words_leaves_plain_sql_alone() {
        let provider = DialectProvider::new(Dialect::SqlServer);
        let sql = "SELECT id, title FROM documents WHERE id=?";
        assert_eq!(provider.quote_reserved_words(sql), sql);
    }

    #[test]
    fn test_quote_reserved_words_wraps_exact_tokens() {
        let provider = DialectProvider::new(Dialect::SqlServer);
        let sql = "SELECT PERCENT, PERCENTAGE, MY_PERCENT FROM stats";
        assert_eq!(
            provider.quote_reserved_words(sql),
            "SELECT [PERCENT], PERCENTAGE, MY_PERCENT FROM stats"
        );

        let db2 = DialectProvider::new(Dialect::Db2);
        assert_eq!(
            db2.quote_reserved_words("UPDATE items SET ATTRIBUTES=? WHERE id=?"),
            "UPDATE items SET \"ATTRIBUTES\"=? WHERE id=?"
        );
    }

    #[test]
    fn test_quote_reserved_words_skips_string_literals() {
        let provider = DialectProvider::new(Dialect::SqlServer);
        assert_eq!(
            provider.quote_reserved_words("SELECT id FROM stats WHERE label = 'PERCENT'"),
            "SELECT id FROM stats WHERE label = 'PERCENT'"
        );
        assert_eq!(
            provider.quote_reserved_words("SELECT PERCENT FROM stats WHERE label = 'it''s PERCENT' AND PERCENT > 1"),
            "SELECT [PERCENT] FROM stats WHERE label = 'it''s PERCENT' AND [PERCENT] > 1"
        );
    }

    #[test]
    fn test_quote_reserved_words_accepts_double_quoted_identifiers() {
        let provider = DialectProvider::new(Dialect::SqlServer);
        let sql = "SELECT \"PERCENT\" FROM stats";
        assert_eq!(provider.quote_reserved_words(sql), sql);

        let mut mysql = DialectProvider::new(Dialect::Mysql);
        mysql.add_reserved_word("KEY");
        let sql = "SELECT \"KEY\" FROM settings";
        assert_eq!(mysql.quote_reserved_words(sql), sql);
    }

    #[test]
    fn test_quote_reserved_words_is_idempotent() {
        let mut provider = DialectProvider::new(Dialect::Mysql);
        provider.add_reserved_word("KEY");
        let once = provider.quote_reserved_words("SELECT KEY, value FROM settings");
        assert_eq!(once, "SELECT `KEY`, value FROM settings");
        assert_eq!(provider.quote_reserved_words(&once), once);
    }

    #[test]
    fn test_quote_reserved_words_is_case_sensitive() {
        let provider = DialectProvider::new(Dialect::SqlServer);
        assert_eq!(
            provider.quote_reserved_words("SELECT percent FROM stats"),
            "SELECT percent FROM stats"
        );
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgresql);
        assert_eq!("MSSQL".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("access".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_dialect_serde_names() {
        let json = serde_json::to_string(&Dialect::SqlServer).unwrap();
        assert_eq!(json, "\"sqlserver\"");
        let parsed: Dialect = serde_json::from_str("\"mssql\"").unwrap();
        assert_eq!(parsed, Dialect::SqlServer);
    }
}
