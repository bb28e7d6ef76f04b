//! `SQLite` Database Engine Implementation
//!
//! This module implements [`ConnectionManager`] and [`Session`] for a directory of `SQLite`
//! database files. Each `<name>.db` file in the data directory is one database.
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - `SQLite` has no users: credentials are accepted as given
//! - A session opened without a database is an in-memory connection whose
//!   `temp.databases` table lists the data directory, so database listing stays plain SQL
//! - Statements run inside a transaction opened on first use; `commit`/`rollback` end it
//! - Timeouts enforced via `busy_timeout`

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ConnectionManager, Credentials, Dialect, RowSet, Session, Statement};
use crate::error::{QuarryError, Result};
use crate::marshal::{MarshaledValue, NativeValue};
use crate::sql::validate_identifier;

/// File extension of database files in the data directory
const DATABASE_EXTENSION: &str = "db";

/// Opens `SQLite` sessions over a data directory
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    data_dir: PathBuf,
    busy_timeout: Option<Duration>,
}

impl SqliteConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), busy_timeout: None }
    }

    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Path of the file backing `database`
    #[must_use]
    pub fn database_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.{DATABASE_EXTENSION}"))
    }

    /// Database names available in the data directory, sorted
    pub fn catalog(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.data_dir).map_err(|e| {
            QuarryError::connection(format!(
                "Failed to read SQLite data directory {}: {e}",
                self.data_dir.display()
            ))
        })?;

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_database_extension(path))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|name| validate_identifier(name, "database").is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout).map_err(|e| {
                QuarryError::connection(format!("Failed to set SQLite busy timeout: {e}"))
            })?;
        }
        Ok(())
    }
}

fn has_database_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(DATABASE_EXTENSION)
}

impl ConnectionManager for SqliteConnector {
    type Session = SqliteSession;

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn open(&self, _credentials: &Credentials, database: Option<&str>) -> Result<SqliteSession> {
        let conn = match database {
            Some(name) => {
                validate_identifier(name, "database")?;
                let path = self.database_path(name);
                if !path.is_file() {
                    return Err(QuarryError::connection(format!("Unknown database '{name}'")));
                }
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(&path, flags).map_err(|e| {
                    QuarryError::connection(format!("Failed to open SQLite database: {e}"))
                })?
            }
            None => {
                let conn = Connection::open_in_memory().map_err(|e| {
                    QuarryError::connection(format!("Failed to open SQLite catalog: {e}"))
                })?;
                load_catalog(&conn, &self.catalog()?)?;
                conn
            }
        };
        self.configure(&conn)?;

        tracing::debug!(data_dir = %self.data_dir.display(), database, "sqlite session opened");
        Ok(SqliteSession { conn })
    }
}

fn load_catalog(conn: &Connection, names: &[String]) -> Result<()> {
    let fail = |e: rusqlite::Error| QuarryError::connection(format!("Failed to load catalog: {e}"));
    conn.execute_batch("CREATE TEMP TABLE databases (name TEXT NOT NULL PRIMARY KEY)")
        .map_err(fail)?;
    let mut insert = conn.prepare("INSERT INTO temp.databases (name) VALUES (?1)").map_err(fail)?;
    for name in names {
        insert.execute([name]).map_err(fail)?;
    }
    Ok(())
}

/// One `SQLite` connection
pub struct SqliteSession {
    conn: Connection,
}

impl SqliteSession {
    fn begin_if_idle(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN")
                .map_err(|e| QuarryError::execution(format!("Failed to begin transaction: {e}")))?;
        }
        Ok(())
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, statement: &Statement) -> Result<RowSet> {
        self.begin_if_idle()?;

        let mut stmt = self
            .conn
            .prepare(&statement.sql)
            .map_err(|e| QuarryError::execution(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
        let params = rusqlite::params_from_iter(statement.params.iter().map(to_sqlite_value));

        if columns.is_empty() {
            // INSERT, DELETE, DDL
            let changed = stmt.execute(params).map_err(|e| QuarryError::execution(e.to_string()))?;
            return Ok(RowSet {
                columns,
                rows: Vec::new(),
                rows_affected: u64::try_from(changed).unwrap_or(u64::MAX),
            });
        }

        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params).map_err(|e| QuarryError::execution(e.to_string()))?;
        while let Some(row) = cursor.next().map_err(|e| QuarryError::execution(e.to_string()))? {
            rows.push(row_to_native(row, width)?);
        }

        Ok(RowSet { columns, rows, rows_affected: 0 })
    }

    async fn commit(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| QuarryError::execution(format!("Failed to commit: {e}")))
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| QuarryError::execution(format!("Failed to roll back: {e}")))
    }

    async fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| QuarryError::connection(format!("Failed to close SQLite database: {e}")))
    }
}

fn to_sqlite_value(value: &MarshaledValue) -> Value {
    match value {
        MarshaledValue::Null => Value::Null,
        MarshaledValue::Bool(b) => Value::Integer(i64::from(*b)),
        MarshaledValue::Int(i) => Value::Integer(*i),
        MarshaledValue::UInt(u) => {
            i64::try_from(*u).map_or_else(|_| Value::Text(u.to_string()), Value::Integer)
        }
        MarshaledValue::Float(f) => Value::Real(*f),
        MarshaledValue::Text(s) => Value::Text(s.clone()),
    }
}

fn row_to_native(row: &Row<'_>, width: usize) -> Result<Vec<NativeValue>> {
    (0..width)
        .map(|idx| {
            let value = row.get_ref(idx).map_err(|e| QuarryError::execution(e.to_string()))?;
            Ok(match value {
                ValueRef::Null => NativeValue::Null,
                ValueRef::Integer(i) => NativeValue::Int(i),
                ValueRef::Real(f) => NativeValue::Float(f),
                ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => NativeValue::Text(text.to_string()),
                    Err(_) => NativeValue::Bytes(bytes.to_vec()),
                },
                ValueRef::Blob(bytes) => NativeValue::Bytes(bytes.to_vec()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_data_dir() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir()
            .join(format!("quarry_sqlite_engine_{}_{id}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("Failed to create data dir");
        dir
    }

    fn creds() -> Credentials {
        Credentials::new("anyone", "anything")
    }

    #[tokio::test]
    async fn test_catalog_lists_db_files_only() {
        let dir = temp_data_dir();
        Connection::open(dir.join("shop.db")).unwrap();
        Connection::open(dir.join("audit.db")).unwrap();
        std::fs::write(dir.join("notes.txt"), "x").unwrap();
        std::fs::write(dir.join("bad-name.db"), "").unwrap();

        let connector = SqliteConnector::new(&dir);
        assert_eq!(connector.catalog().unwrap(), vec!["audit", "shop"]);

        let mut session = connector.open(&creds(), None).await.unwrap();
        let rows = session
            .execute(&Statement::new(Dialect::Sqlite.list_databases_query()))
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![
            vec![NativeValue::Text("audit".into())],
            vec![NativeValue::Text("shop".into())],
        ]);
        session.close().await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unknown_database_is_connection_error() {
        let dir = temp_data_dir();
        let connector = SqliteConnector::new(&dir);
        let result = connector.open(&creds(), Some("missing")).await;
        assert!(matches!(result, Err(QuarryError::Connection(_))));

        let result = connector.open(&creds(), Some("../etc/passwd")).await;
        assert!(matches!(result, Err(QuarryError::Validation(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_execute_binds_and_commits() {
        let dir = temp_data_dir();
        Connection::open(dir.join("shop.db")).unwrap();
        let connector = SqliteConnector::new(&dir);

        let mut session = connector.open(&creds(), Some("shop")).await.unwrap();
        session
            .execute(&Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        let inserted = session
            .execute(&Statement::with_params(
                "INSERT INTO t (id, name) VALUES (?, ?)",
                vec![MarshaledValue::Int(1), MarshaledValue::from("one")],
            ))
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, 1);
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let mut session = connector.open(&creds(), Some("shop")).await.unwrap();
        let rows = session.execute(&Statement::new("SELECT id, name FROM t")).await.unwrap();
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.rows, vec![vec![NativeValue::Int(1), NativeValue::Text("one".into())]]);
        session.close().await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let dir = temp_data_dir();
        {
            let conn = Connection::open(dir.join("shop.db")).unwrap();
            conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", []).unwrap();
        }
        let connector = SqliteConnector::new(&dir);

        let mut session = connector.open(&creds(), Some("shop")).await.unwrap();
        session
            .execute(&Statement::with_params(
                "INSERT INTO t (id) VALUES (?)",
                vec![MarshaledValue::Int(7)],
            ))
            .await
            .unwrap();
        session.rollback().await.unwrap();
        let rows = session.execute(&Statement::new("SELECT COUNT(*) FROM t")).await.unwrap();
        assert_eq!(rows.rows[0][0], NativeValue::Int(0));
        session.close().await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_sql_error_is_execution_error() {
        let dir = temp_data_dir();
        Connection::open(dir.join("shop.db")).unwrap();
        let connector = SqliteConnector::new(&dir);

        let mut session = connector.open(&creds(), Some("shop")).await.unwrap();
        let result = session.execute(&Statement::new("SELECT * FROM nowhere")).await;
        let err = result.unwrap_err();
        assert!(matches!(err, QuarryError::Execution(_)));
        assert!(err.message().contains("nowhere"));
        session.close().await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_values() {
        assert_eq!(to_sqlite_value(&MarshaledValue::UInt(5)), Value::Integer(5));
        assert_eq!(
            to_sqlite_value(&MarshaledValue::UInt(u64::MAX)),
            Value::Text(u64::MAX.to_string())
        );
        assert_eq!(to_sqlite_value(&MarshaledValue::Bool(false)), Value::Integer(0));
    }
}
