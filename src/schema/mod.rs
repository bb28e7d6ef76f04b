//! Schema Introspection
//!
//! Discovers databases, tables and column structure at request time. Nothing is cached: every
//! call asks the engine.
//!
//! Column metadata is rebuilt from the engine's own report: `MySQL` `information_schema.COLUMNS`
//! rows shaped like `DESCRIBE` output (`Field`, `Type`, `Null`, `Key`, `Default`, `Extra`) or
//! `SQLite` `PRAGMA table_info` rows (`cid`, `name`, `type`, `notnull`, `dflt_value`, `pk`).
//! A missing table yields no columns on either engine. Statement failures surface as
//! `Schema` errors and never yield partial results.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::engine::{Dialect, RowSet, Session, Statement};
use crate::error::{QuarryError, Result};
use crate::marshal::NativeValue;
use crate::sql::SqlBuilder;

const fn default_true() -> bool {
    true
}

/// One column, as introspected or as requested for CREATE TABLE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Declared type without its length (`VARCHAR`, `int unsigned`)
    #[serde(alias = "declared_type")]
    pub data_type: String,

    /// Length or precision (`255`, `10,2`)
    #[serde(default, deserialize_with = "length_from_text_or_number")]
    #[schemars(with = "Option<String>")]
    pub length: Option<String>,

    #[serde(default = "default_true", alias = "allow_null")]
    pub nullable: bool,

    #[serde(default)]
    pub is_primary_key: bool,

    #[serde(default)]
    pub auto_increment: bool,
}

impl ColumnDescriptor {
    /// Nullable, non-key column without length
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: None,
            nullable: true,
            is_primary_key: false,
            auto_increment: false,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: impl Into<String>) -> Self {
        self.length = Some(length.into());
        self
    }

    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

// Clients send lengths both as "255" and as 255.
fn length_from_text_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Length {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Length>::deserialize(deserializer)?.map(|length| match length {
        Length::Text(text) => text,
        Length::Number(n) => n.to_string(),
    }))
}

/// A table and its ordered columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Primary key column names in column order
    pub fn primary_key(&self) -> Vec<String> {
        self.columns.iter().filter(|c| c.is_primary_key).map(|c| c.name.clone()).collect()
    }
}

/// Reads databases, tables and column structure through a session
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Databases visible to the session's user, in engine order
    pub async fn list_databases<S: Session>(&self, session: &mut S) -> Result<Vec<String>> {
        let statement = Statement::new(session.dialect().list_databases_query());
        let rows = run(session, &statement).await?;
        first_column_names(rows)
    }

    /// Tables of the session's current database
    pub async fn list_tables<S: Session>(&self, session: &mut S) -> Result<Vec<String>> {
        let statement = Statement::new(session.dialect().list_tables_query());
        let rows = run(session, &statement).await?;
        first_column_names(rows)
    }

    /// Ordered columns of `table`
    pub async fn describe_table<S: Session>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<TableDescriptor> {
        let dialect = session.dialect();
        let statement = SqlBuilder::new(dialect).build_describe(table)?;
        let rows = run(session, &statement).await?;

        let columns = match dialect {
            Dialect::MySql => parse_mysql_describe(&rows)?,
            Dialect::Sqlite => parse_sqlite_table_info(&rows)?,
        };

        Ok(TableDescriptor { table_name: table.to_string(), columns })
    }
}

async fn run<S: Session>(session: &mut S, statement: &Statement) -> Result<RowSet> {
    tracing::debug!(sql = %statement.sql, "introspect");
    session.execute(statement).await.map_err(QuarryError::into_schema)
}

fn first_column_names(rows: RowSet) -> Result<Vec<String>> {
    rows.rows
        .iter()
        .map(|row| {
            row.first()
                .and_then(NativeValue::as_text)
                .ok_or_else(|| QuarryError::schema("engine returned a row without a name"))
        })
        .collect()
}

/// Locates named columns in an introspection result
struct Report<'a> {
    rows: &'a RowSet,
}

impl<'a> Report<'a> {
    fn index(&self, column: &str) -> Result<usize> {
        self.rows
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| QuarryError::schema(format!("introspection result lacks '{column}'")))
    }

    fn text(row: &[NativeValue], idx: usize) -> String {
        row.get(idx).and_then(NativeValue::as_text).unwrap_or_default()
    }
}

fn parse_mysql_describe(rows: &RowSet) -> Result<Vec<ColumnDescriptor>> {
    if rows.rows.is_empty() {
        return Ok(Vec::new());
    }

    let report = Report { rows };
    let field = report.index("Field")?;
    let ty = report.index("Type")?;
    let null = report.index("Null")?;
    let key = report.index("Key")?;
    let extra = report.index("Extra")?;

    Ok(rows
        .rows
        .iter()
        .map(|row| {
            let (data_type, length) = split_declared_type(&Report::text(row, ty));
            ColumnDescriptor {
                name: Report::text(row, field),
                data_type,
                length,
                nullable: Report::text(row, null).eq_ignore_ascii_case("YES"),
                is_primary_key: Report::text(row, key).eq_ignore_ascii_case("PRI"),
                auto_increment: Report::text(row, extra).to_ascii_lowercase().contains("auto_increment"),
            }
        })
        .collect())
}

fn parse_sqlite_table_info(rows: &RowSet) -> Result<Vec<ColumnDescriptor>> {
    if rows.rows.is_empty() {
        return Ok(Vec::new());
    }

    let report = Report { rows };
    let name = report.index("name")?;
    let ty = report.index("type")?;
    let notnull = report.index("notnull")?;
    let pk = report.index("pk")?;

    Ok(rows
        .rows
        .iter()
        .map(|row| {
            let (data_type, length) = split_declared_type(&Report::text(row, ty));
            let is_primary_key = row.get(pk).and_then(NativeValue::as_u64).unwrap_or(0) > 0;
            ColumnDescriptor {
                name: Report::text(row, name),
                // INTEGER PRIMARY KEY aliases the rowid, which the engine assigns
                auto_increment: is_primary_key && data_type.eq_ignore_ascii_case("INTEGER"),
                data_type,
                length,
                nullable: row.get(notnull).and_then(NativeValue::as_u64).unwrap_or(0) == 0,
                is_primary_key,
            }
        })
        .collect())
}

/// Split `varchar(255)` into (`varchar`, `255`) and `int(11) unsigned` into (`int unsigned`, `11`)
fn split_declared_type(declared: &str) -> (String, Option<String>) {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return (declared.to_string(), None);
    };
    let Some(close) = declared[open..].rfind(')').map(|i| open + i) else {
        return (declared.to_string(), None);
    };

    let length = declared[open + 1..close].trim().to_string();
    let base = format!("{} {}", declared[..open].trim(), declared[close + 1..].trim());
    let base = base.trim().to_string();
    (base, (!length.is_empty()).then_some(length))
}
