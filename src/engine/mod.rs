//! Database Engine Traits and Core Types
//!
//! This module defines the connection abstraction the rest of the crate is written against.
//! Each engine (`MySQL`, `SQLite`) implements [`ConnectionManager`] and [`Session`].
//!
//! # Session Lifetime
//! A session wraps exactly one driver connection and belongs to exactly one operation.
//! Operations close sessions explicitly on every normal exit path; a session dropped
//! mid-flight (cancellation) releases its connection through the driver's own drop handling.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent. Engine-specific SQL spelling lives
//! in [`Dialect`], never in the engines themselves.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use crate::error::Result;
use crate::marshal::{MarshaledValue, NativeValue};

#[cfg(not(any(feature = "mysql", feature = "sqlite")))]
compile_error!("enable at least one database engine feature: `mysql` or `sqlite`");

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` databases stored as `<name>.db` files in one directory
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" => Ok(Self::SQLite),
            other => Err(crate::error::QuarryError::config(format!(
                "unknown engine '{other}' (expected mysql or sqlite)"
            ))),
        }
    }
}

/// Per-request credentials
///
/// Never persisted. The `Debug` output redacts the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    /// Database user name
    pub username: String,

    /// Database password
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection information returned by the test-connection operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Engine behind the deployment
    pub engine: DatabaseType,

    /// Database server version string
    pub server_version: String,

    /// Server information (`MySQL 8.0.35`, `MariaDB 10.11.2`, `SQLite 3.45.0`)
    pub server_info: String,
}

/// SQL text plus positional bind parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<MarshaledValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<MarshaledValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// Number of `?` placeholders in the SQL text outside quoted identifiers
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        let mut count = 0;
        let mut quote: Option<char> = None;
        for ch in self.sql.chars() {
            match (quote, ch) {
                (None, '`' | '"' | '\'') => quote = Some(ch),
                (Some(q), c) if c == q => quote = None,
                (None, '?') => count += 1,
                _ => {}
            }
        }
        count
    }
}

/// Raw result of one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Rows as positional native values
    pub rows: Vec<Vec<NativeValue>>,

    /// Rows affected (writes); 0 for reads
    pub rows_affected: u64,
}

/// Engine-specific SQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Quote an already validated identifier
    #[must_use]
    pub fn quote(self, identifier: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", identifier.replace('`', "``")),
            Self::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    #[must_use]
    pub const fn version_query(self) -> &'static str {
        match self {
            Self::MySql => "SELECT VERSION()",
            Self::Sqlite => "SELECT sqlite_version()",
        }
    }

    #[must_use]
    pub const fn list_databases_query(self) -> &'static str {
        match self {
            Self::MySql => "SHOW DATABASES",
            // catalog table of an unbound sqlite session
            Self::Sqlite => "SELECT name FROM temp.databases ORDER BY name",
        }
    }

    #[must_use]
    pub const fn list_tables_query(self) -> &'static str {
        match self {
            Self::MySql => "SHOW TABLES",
            Self::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name"
            }
        }
    }

    /// Describe statement for a validated table name
    ///
    /// Both spellings yield zero rows for a missing table instead of failing.
    #[must_use]
    pub fn describe_statement(self, table: &str) -> Statement {
        match self {
            Self::MySql => Statement::with_params(
                "SELECT COLUMN_NAME AS `Field`, COLUMN_TYPE AS `Type`, IS_NULLABLE AS `Null`, \
                 COLUMN_KEY AS `Key`, COLUMN_DEFAULT AS `Default`, EXTRA AS `Extra` \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                vec![MarshaledValue::Text(table.to_string())],
            ),
            Self::Sqlite => Statement::new(format!("PRAGMA table_info({})", self.quote(table))),
        }
    }

    /// Connection info from the raw version string the engine reports
    ///
    /// `MySQL` reports `8.0.35`, `MariaDB` `10.11.2-MariaDB-1:10.11.2+maria~ubu2204`.
    #[must_use]
    pub fn connection_info(self, raw_version: &str) -> ConnectionInfo {
        let raw_version = raw_version.trim();
        let (server_version, server_info) = match self {
            Self::MySql if raw_version.to_ascii_uppercase().contains("MARIADB") => {
                let version = raw_version.split('-').next().unwrap_or(raw_version).to_string();
                let info = format!("MariaDB {version}");
                (version, info)
            }
            Self::MySql => {
                let version = raw_version.split_whitespace().next().unwrap_or(raw_version).to_string();
                let info = format!("MySQL {version}");
                (version, info)
            }
            Self::Sqlite => (raw_version.to_string(), format!("SQLite {raw_version}")),
        };
        ConnectionInfo { engine: self.engine(), server_version, server_info }
    }

    #[must_use]
    pub const fn engine(self) -> DatabaseType {
        match self {
            Self::MySql => DatabaseType::MySQL,
            Self::Sqlite => DatabaseType::SQLite,
        }
    }
}

/// One open database session
pub trait Session: Send {
    /// SQL dialect spoken by this session
    fn dialect(&self) -> Dialect;

    /// Execute one statement with bound parameters
    ///
    /// SQL-level failures surface as `Execution` errors carrying the engine message.
    fn execute(
        &mut self,
        statement: &Statement,
    ) -> impl Future<Output = Result<RowSet>> + Send;

    /// Commit the current transaction
    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Roll back the current transaction
    fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the underlying connection
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens sessions for per-request credentials
pub trait ConnectionManager: Send + Sync {
    type Session: Session;

    /// SQL dialect of the sessions this manager opens
    fn dialect(&self) -> Dialect;

    /// Open a session, optionally bound to `database`
    ///
    /// Fails with `Connection` on bad credentials, unreachable host or unknown database.
    /// Never retries.
    fn open(
        &self,
        credentials: &Credentials,
        database: Option<&str>,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// Runtime-selected engine
pub enum AnyConnector {
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlConnector),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnector),
}

/// Session of a runtime-selected engine
pub enum AnySession {
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlSession),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteSession),
}

impl ConnectionManager for AnyConnector {
    type Session = AnySession;

    fn dialect(&self) -> Dialect {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(c) => c.dialect(),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.dialect(),
        }
    }

    async fn open(&self, credentials: &Credentials, database: Option<&str>) -> Result<AnySession> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(c) => c.open(credentials, database).await.map(AnySession::MySql),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(c) => c.open(credentials, database).await.map(AnySession::Sqlite),
        }
    }
}

impl Session for AnySession {
    fn dialect(&self) -> Dialect {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.dialect(),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.dialect(),
        }
    }

    async fn execute(&mut self, statement: &Statement) -> Result<RowSet> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.execute(statement).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.execute(statement).await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.commit().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.commit().await,
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.rollback().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.rollback().await,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.close().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.close().await,
        }
    }
}
