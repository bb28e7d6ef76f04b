//! MySQL Database Engine Implementation
//!
//! This module implements [`ConnectionManager`] and [`Session`] for MySQL databases (including
//! MariaDB).
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - Sessions run with `autocommit = 0`; writes become visible on `commit`
//! - MySQL commits DDL implicitly, so a rolled-back CREATE/DROP/TRUNCATE stays applied
//! - Parameterless statements use the text protocol (`USE`-style commands cannot be prepared);
//!   everything else is prepared and bound
//! - The text protocol reports every value as bytes, so values are decoded by column type
//! - Timeouts enforced via `tokio::time::timeout`
//! - Dropping a session without `close` lets the driver release the connection on its own

use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::{prelude::*, Column, Conn, OptsBuilder, Params, Row, Value};
use std::future::Future;
use std::time::Duration;

use crate::engine::{ConnectionManager, Credentials, Dialect, RowSet, Session, Statement};
use crate::error::{QuarryError, Result};
use crate::marshal::{MarshaledValue, NativeValue, TimeValue};

/// Character set id MySQL uses for binary strings
const BINARY_CHARSET: u16 = 63;

/// Opens MySQL sessions against one fixed server
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl MySqlConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, timeout: None }
    }

    /// Bound connect and statement time
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn opts(&self, credentials: &Credentials, database: Option<&str>) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(credentials.username.clone()))
            .pass(Some(credentials.password.clone()))
            .db_name(database.map(str::to_string))
            .init(vec!["SET autocommit = 0"])
    }
}

impl ConnectionManager for MySqlConnector {
    type Session = MySqlSession;

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn open(&self, credentials: &Credentials, database: Option<&str>) -> Result<MySqlSession> {
        let opts = self.opts(credentials, database);
        let conn = with_timeout(self.timeout, "connect", Conn::new(opts))
            .await?
            .map_err(|e| QuarryError::connection(format!("Failed to connect to MySQL: {e}")))?;

        tracing::debug!(host = %self.host, port = self.port, "mysql session opened");
        Ok(MySqlSession { conn, timeout: self.timeout })
    }
}

/// One MySQL connection
pub struct MySqlSession {
    conn: Conn,
    timeout: Option<Duration>,
}

impl Session for MySqlSession {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute(&mut self, statement: &Statement) -> Result<RowSet> {
        let outcome: std::result::Result<Vec<Row>, mysql_async::Error> =
            if statement.params.is_empty() {
                with_timeout(self.timeout, "statement", self.conn.query(statement.sql.as_str()))
                    .await?
            } else {
                let params =
                    Params::Positional(statement.params.iter().map(to_mysql_value).collect());
                with_timeout(
                    self.timeout,
                    "statement",
                    self.conn.exec(statement.sql.as_str(), params),
                )
                .await?
            };
        let rows = outcome.map_err(|e| QuarryError::execution(e.to_string()))?;

        let rows_affected = self.conn.affected_rows();

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns_ref().iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();

        let rows = rows.iter().map(row_to_native).collect::<Result<Vec<_>>>()?;

        Ok(RowSet { columns, rows, rows_affected })
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .map_err(|e| QuarryError::execution(format!("Failed to commit: {e}")))
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .map_err(|e| QuarryError::execution(format!("Failed to roll back: {e}")))
    }

    async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| QuarryError::connection(format!("Failed to disconnect: {e}")))
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    what: &str,
    fut: impl Future<Output = T>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            QuarryError::execution(format!("MySQL {what} exceeded timeout of {}ms", limit.as_millis()))
        }),
        None => Ok(fut.await),
    }
}

fn to_mysql_value(value: &MarshaledValue) -> Value {
    match value {
        MarshaledValue::Null => Value::NULL,
        MarshaledValue::Bool(b) => Value::Int(i64::from(*b)),
        MarshaledValue::Int(i) => Value::Int(*i),
        MarshaledValue::UInt(u) => Value::UInt(*u),
        MarshaledValue::Float(f) => Value::Double(*f),
        MarshaledValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
    }
}

fn row_to_native(row: &Row) -> Result<Vec<NativeValue>> {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row.as_ref(idx).ok_or_else(|| {
                QuarryError::execution(format!("Failed to get value at index {idx}"))
            })?;
            mysql_value_to_native(column, value)
        })
        .collect()
}

/// Convert a MySQL value to a native value using its column metadata
fn mysql_value_to_native(column: &Column, value: &Value) -> Result<NativeValue> {
    let column_type = column.column_type();

    Ok(match value {
        Value::NULL => NativeValue::Null,
        Value::Int(i) => NativeValue::Int(*i),
        Value::UInt(u) => NativeValue::UInt(*u),
        Value::Float(f) => NativeValue::Float(f64::from(*f)),
        Value::Double(d) => NativeValue::Float(*d),
        Value::Date(year, month, day, hour, minute, second, micro) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                .ok_or_else(|| {
                    QuarryError::marshal(format!(
                        "invalid calendar date {year:04}-{month:02}-{day:02} in column '{}'",
                        column.name_str()
                    ))
                })?;
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                NativeValue::Date(date)
            } else {
                let dt = date
                    .and_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*minute),
                        u32::from(*second),
                        *micro,
                    )
                    .ok_or_else(|| {
                        QuarryError::marshal(format!(
                            "invalid time of day in column '{}'",
                            column.name_str()
                        ))
                    })?;
                NativeValue::DateTime(dt)
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => NativeValue::Time(TimeValue {
            negative: *negative,
            hours: days * 24 + u32::from(*hours),
            minutes: *minutes,
            seconds: *seconds,
            micros: *micros,
        }),
        Value::Bytes(bytes) => bytes_to_native(column, bytes)?,
    })
}

/// Decode a byte value (text protocol, decimals, strings, blobs) by column type
fn bytes_to_native(column: &Column, bytes: &[u8]) -> Result<NativeValue> {
    let unparsable = |kind: &str| {
        QuarryError::marshal(format!(
            "could not decode {kind} value in column '{}'",
            column.name_str()
        ))
    };

    let column_type = column.column_type();
    match column_type {
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("decimal"))?;
            Ok(NativeValue::Decimal(text.to_string()))
        }
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("integer"))?;
            if column.flags().contains(ColumnFlags::UNSIGNED_FLAG) {
                text.parse().map(NativeValue::UInt).map_err(|_| unparsable("integer"))
            } else {
                text.parse().map(NativeValue::Int).map_err(|_| unparsable("integer"))
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("float"))?;
            text.parse().map(NativeValue::Float).map_err(|_| unparsable("float"))
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("date"))?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(NativeValue::Date)
                .map_err(|_| unparsable("date"))
        }
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("datetime"))?;
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .map(NativeValue::DateTime)
                .map_err(|_| unparsable("datetime"))
        }
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            let text = std::str::from_utf8(bytes).map_err(|_| unparsable("time"))?;
            parse_mysql_time(text).map(NativeValue::Time).ok_or_else(|| unparsable("time"))
        }
        ColumnType::MYSQL_TYPE_BIT => Ok(NativeValue::Bytes(bytes.to_vec())),
        _ if column.character_set() == BINARY_CHARSET => Ok(NativeValue::Bytes(bytes.to_vec())),
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => Ok(NativeValue::Text(text.to_string())),
            Err(_) => Ok(NativeValue::Bytes(bytes.to_vec())),
        },
    }
}

/// Parse the text form of a MySQL `TIME` (`[-]HHH:MM:SS[.ffffff]`)
fn parse_mysql_time(text: &str) -> Option<TimeValue> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, fraction) = rest.split_once('.').unwrap_or((rest, ""));
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse().ok()?;
    let minutes = parts.next()?.parse().ok()?;
    let seconds = parts.next()?.parse().ok()?;
    if parts.next().is_some() || fraction.len() > 6 {
        return None;
    }
    let micros = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<6}").parse().ok()?
    };
    Some(TimeValue { negative, hours, minutes, seconds, micros })
}
