//! CRUD Orchestration
//!
//! Sequences one administration operation: capability check, request validation, connect,
//! optional database selection, statement building, execution, commit or rollback, close.
//!
//! # Session Handling
//! - Reads never commit or roll back; the session is closed once the data is collected or on error
//! - Mutations commit on success and roll back on any failure after execution began
//! - Every exit path closes the session; close failures are logged, never surfaced
//!
//! Mutation statements are built before connecting, so an invalid request never opens a
//! session.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::Instrument;
use uuid::Uuid;

use crate::capability::{Capabilities, OperationKind};
use crate::engine::{ConnectionInfo, ConnectionManager, Credentials, RowSet, Session, Statement};
use crate::error::{QuarryError, Result};
use crate::marshal::{BinaryEncoding, ColumnValues, NativeValue, ValueMarshaller};
use crate::pagination::{PageRequest, PageResult, PaginatedRowFetcher, TableSummary, DEFAULT_PAGE_LIMIT};
use crate::schema::{ColumnDescriptor, SchemaIntrospector};
use crate::sql::{parse_id_list, validate_identifier, SqlBuilder};

/// Deployment settings the orchestrator needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub default_page_limit: u64,
    pub max_page_limit: u64,
    pub binary_encoding: BinaryEncoding,
    pub capabilities: Capabilities,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: 1000,
            binary_encoding: BinaryEncoding::Reject,
            capabilities: Capabilities::default(),
        }
    }
}

/// Exposed operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TestConnection,
    ListDatabases,
    DescribeTables,
    FetchPage,
    CreateTable,
    InsertRow,
    DeleteRows,
    DropTable,
    TruncateTable,
}

impl Operation {
    pub const ALL: [Self; 9] = [
        Self::TestConnection,
        Self::ListDatabases,
        Self::DescribeTables,
        Self::FetchPage,
        Self::CreateTable,
        Self::InsertRow,
        Self::DeleteRows,
        Self::DropTable,
        Self::TruncateTable,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TestConnection => "test_connection",
            Self::ListDatabases => "list_databases",
            Self::DescribeTables => "describe_tables",
            Self::FetchPage => "fetch_page",
            Self::CreateTable => "create_table",
            Self::InsertRow => "insert_row",
            Self::DeleteRows => "delete_rows",
            Self::DropTable => "drop_table",
            Self::TruncateTable => "truncate_table",
        }
    }

    #[must_use]
    pub const fn kind(self) -> OperationKind {
        match self {
            Self::TestConnection | Self::ListDatabases | Self::DescribeTables | Self::FetchPage => {
                OperationKind::Read
            }
            Self::InsertRow | Self::DeleteRows => OperationKind::Write,
            Self::CreateTable | Self::DropTable | Self::TruncateTable => OperationKind::Ddl,
        }
    }

    fn span(self) -> tracing::Span {
        tracing::info_span!("operation", op = self.name(), operation_id = %Uuid::new_v4())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Operation {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| QuarryError::validation(format!("unknown operation '{s}'")))
    }
}

/// Transport-facing failure triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl From<&QuarryError> for Failure {
    fn from(err: &QuarryError) -> Self {
        let status = match err {
            QuarryError::Validation(_) => 400,
            QuarryError::Connection(_) => 401,
            QuarryError::CapabilityViolation(_) => 403,
            QuarryError::Execution(_) => 422,
            QuarryError::Schema(_) | QuarryError::Marshal(_) | QuarryError::Config(_) => 500,
        };
        Self { status, code: err.error_code().to_string(), message: err.message() }
    }
}

/// Tables of one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DescribeTablesRequest {
    #[serde(alias = "db")]
    pub db_name: String,
}

/// Page of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FetchPageRequest {
    #[serde(alias = "db")]
    pub db_name: String,

    #[serde(alias = "tb_name")]
    pub table_name: String,

    /// 1-based page number
    #[serde(default = "first_page")]
    pub page: i64,

    /// Rows per page; the deployment default when absent
    #[serde(default)]
    pub limit: Option<i64>,
}

const fn first_page() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreateTableRequest {
    #[serde(alias = "db")]
    pub db_name: String,

    #[serde(alias = "tb_name")]
    pub table_name: String,

    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InsertRequest {
    #[serde(alias = "db")]
    pub db_name: String,

    #[serde(alias = "tb_name")]
    pub table_name: String,

    /// Column values in insertion order
    pub data: ColumnValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteRequest {
    #[serde(alias = "db")]
    pub db_name: String,

    #[serde(alias = "tb_name")]
    pub table_name: String,

    #[serde(alias = "pk_col")]
    pub pk_column: String,

    /// Comma-joined primary key values (`"101,102,105"`)
    pub ids: String,
}

/// Drop or truncate target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableRequest {
    #[serde(alias = "db")]
    pub db_name: String,

    #[serde(alias = "tb_name")]
    pub table_name: String,
}

/// Confirmation of a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub message: String,
    pub rows_affected: u64,
}

/// Façade over connection, introspection, pagination and statement building
pub struct CrudOrchestrator<C> {
    connector: C,
    settings: Settings,
    introspector: SchemaIntrospector,
    fetcher: PaginatedRowFetcher,
    marshaller: ValueMarshaller,
}

impl<C: ConnectionManager> CrudOrchestrator<C> {
    pub fn new(connector: C, settings: Settings) -> Self {
        let marshaller = ValueMarshaller::new(settings.binary_encoding);
        Self {
            connector,
            settings,
            introspector: SchemaIntrospector,
            fetcher: PaginatedRowFetcher::new(marshaller),
            marshaller,
        }
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Open a session with `credentials` and report the server
    pub async fn test_connection(&self, credentials: &Credentials) -> Result<ConnectionInfo> {
        let op = Operation::TestConnection;
        async {
            self.admit(op)?;
            let mut session = self.connector.open(credentials, None).await?;
            let dialect = session.dialect();
            let outcome = session
                .execute(&Statement::new(dialect.version_query()))
                .await
                .and_then(|rows| {
                    rows.rows
                        .first()
                        .and_then(|row| row.first())
                        .and_then(NativeValue::as_text)
                        .map(|raw| dialect.connection_info(&raw))
                        .ok_or_else(|| QuarryError::schema("server did not report a version"))
                });
            finish_read(session, outcome).await
        }
        .instrument(op.span())
        .await
    }

    /// Databases visible to `credentials`
    pub async fn list_databases(&self, credentials: &Credentials) -> Result<Vec<String>> {
        let op = Operation::ListDatabases;
        async {
            self.admit(op)?;
            let mut session = self.connector.open(credentials, None).await?;
            let outcome = self.introspector.list_databases(&mut session).await;
            finish_read(session, outcome).await
        }
        .instrument(op.span())
        .await
    }

    /// Every table of a database with its columns and row count
    pub async fn describe_tables(
        &self,
        credentials: &Credentials,
        request: &DescribeTablesRequest,
    ) -> Result<BTreeMap<String, TableSummary>> {
        let op = Operation::DescribeTables;
        async {
            self.admit(op)?;
            validate_identifier(&request.db_name, "database")?;
            let mut session = self.connector.open(credentials, Some(&request.db_name)).await?;
            let outcome = self.describe_all(&mut session).await;
            finish_read(session, outcome).await
        }
        .instrument(op.span())
        .await
    }

    async fn describe_all(&self, session: &mut C::Session) -> Result<BTreeMap<String, TableSummary>> {
        let tables = self.introspector.list_tables(session).await?;
        let mut described = BTreeMap::new();
        for table in tables {
            let summary = self.fetcher.describe_table_structure(session, &table).await?;
            described.insert(table, summary);
        }
        Ok(described)
    }

    /// One page of a table
    pub async fn fetch_page(&self, credentials: &Credentials, request: &FetchPageRequest) -> Result<PageResult> {
        let op = Operation::FetchPage;
        async {
            self.admit(op)?;
            validate_identifier(&request.db_name, "database")?;
            validate_identifier(&request.table_name, "table")?;
            let limit = match request.limit {
                Some(limit) => limit,
                None => i64::try_from(self.settings.default_page_limit).unwrap_or(i64::MAX),
            };
            let page = PageRequest::new(
                request.table_name.clone(),
                request.page,
                limit,
                self.settings.max_page_limit,
            )?;

            let mut session = self.connector.open(credentials, Some(&request.db_name)).await?;
            let outcome = self.fetcher.fetch_page(&mut session, &page).await;
            finish_read(session, outcome).await
        }
        .instrument(op.span())
        .await
    }

    pub async fn create_table(
        &self,
        credentials: &Credentials,
        request: &CreateTableRequest,
    ) -> Result<MutationOutcome> {
        let rows = self
            .mutate(Operation::CreateTable, credentials, &request.db_name, |sql| {
                sql.build_create_table(&request.table_name, &request.columns)
            })
            .await?;
        Ok(MutationOutcome {
            message: format!("table '{}' created", request.table_name),
            rows_affected: rows.rows_affected,
        })
    }

    pub async fn insert_row(&self, credentials: &Credentials, request: &InsertRequest) -> Result<MutationOutcome> {
        let rows = self
            .mutate(Operation::InsertRow, credentials, &request.db_name, |sql| {
                let mut statement = sql.build_insert(&request.table_name, &request.data)?;
                statement.params = statement
                    .params
                    .iter()
                    .map(|value| self.marshaller.to_bind(value))
                    .collect::<Result<Vec<_>>>()?;
                Ok(statement)
            })
            .await?;
        Ok(MutationOutcome {
            message: format!("{} row(s) inserted into '{}'", rows.rows_affected, request.table_name),
            rows_affected: rows.rows_affected,
        })
    }

    pub async fn delete_rows(&self, credentials: &Credentials, request: &DeleteRequest) -> Result<MutationOutcome> {
        let rows = self
            .mutate(Operation::DeleteRows, credentials, &request.db_name, |sql| {
                let ids = parse_id_list(&request.ids)?;
                sql.build_delete(&request.table_name, &request.pk_column, &ids)
            })
            .await?;
        Ok(MutationOutcome {
            message: format!("{} row(s) deleted from '{}'", rows.rows_affected, request.table_name),
            rows_affected: rows.rows_affected,
        })
    }

    pub async fn drop_table(&self, credentials: &Credentials, request: &TableRequest) -> Result<MutationOutcome> {
        let rows = self
            .mutate(Operation::DropTable, credentials, &request.db_name, |sql| {
                sql.build_drop(&request.table_name)
            })
            .await?;
        Ok(MutationOutcome {
            message: format!("table '{}' dropped", request.table_name),
            rows_affected: rows.rows_affected,
        })
    }

    pub async fn truncate_table(&self, credentials: &Credentials, request: &TableRequest) -> Result<MutationOutcome> {
        let rows = self
            .mutate(Operation::TruncateTable, credentials, &request.db_name, |sql| {
                sql.build_truncate(&request.table_name)
            })
            .await?;
        Ok(MutationOutcome {
            message: format!("table '{}' truncated", request.table_name),
            // SQLite reports the deleted rows, MySQL reports 0
            rows_affected: rows.rows_affected,
        })
    }

    fn admit(&self, op: Operation) -> Result<()> {
        tracing::debug!("operation started");
        self.settings.capabilities.check(op.name(), op.kind())
    }

    /// Build, connect, execute, then commit or roll back
    async fn mutate(
        &self,
        op: Operation,
        credentials: &Credentials,
        db_name: &str,
        build: impl FnOnce(SqlBuilder) -> Result<Statement>,
    ) -> Result<RowSet> {
        async {
            self.admit(op)?;
            validate_identifier(db_name, "database")?;
            let statement = build(SqlBuilder::new(self.connector.dialect()))?;
            tracing::debug!(sql = %statement.sql, params = statement.params.len(), "statement built");

            let mut session = self.connector.open(credentials, Some(db_name)).await?;
            let outcome = session.execute(&statement).await;
            let outcome = finish_write(session, outcome).await;
            if let Ok(rows) = &outcome {
                tracing::debug!(rows_affected = rows.rows_affected, "operation committed");
            }
            outcome
        }
        .instrument(op.span())
        .await
    }
}

/// Close a read session and hand back what it produced
async fn finish_read<S: Session, T>(session: S, outcome: Result<T>) -> Result<T> {
    if let Err(err) = &outcome {
        tracing::debug!(error = %err, "operation failed");
    }
    close_quietly(session).await;
    outcome
}

/// Commit on success, roll back on failure, always close
async fn finish_write<S: Session>(mut session: S, outcome: Result<RowSet>) -> Result<RowSet> {
    let outcome = match outcome {
        Ok(rows) => match session.commit().await {
            Ok(()) => Ok(rows),
            Err(err) => {
                rollback_quietly(&mut session).await;
                Err(err)
            }
        },
        Err(err) => {
            tracing::debug!(error = %err, "statement failed, rolling back");
            rollback_quietly(&mut session).await;
            Err(err)
        }
    };
    close_quietly(session).await;
    outcome
}

async fn rollback_quietly<S: Session>(session: &mut S) {
    if let Err(err) = session.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}

async fn close_quietly<S: Session>(session: S) {
    if let Err(err) = session.close().await {
        tracing::warn!(error = %err, "closing session failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_mapping() {
        let cases = [
            (QuarryError::validation("x"), 400, "VALIDATION_FAILED"),
            (QuarryError::connection("x"), 401, "CONNECTION_FAILED"),
            (QuarryError::capability_violation("x"), 403, "CAPABILITY_VIOLATION"),
            (QuarryError::execution("x"), 422, "EXECUTION_FAILED"),
            (QuarryError::schema("x"), 500, "SCHEMA_FAILED"),
            (QuarryError::marshal("x"), 500, "MARSHAL_FAILED"),
            (QuarryError::config("x"), 500, "CONFIG_ERROR"),
        ];
        for (err, status, code) in cases {
            let failure = Failure::from(&err);
            assert_eq!(failure.status, status);
            assert_eq!(failure.code, code);
            assert_eq!(failure.message, err.message());
        }
    }

    #[test]
    fn test_operation_names_roundtrip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
        assert!("select_star".parse::<Operation>().is_err());
        assert_eq!(Operation::FetchPage.kind(), OperationKind::Read);
        assert_eq!(Operation::DeleteRows.kind(), OperationKind::Write);
        assert_eq!(Operation::TruncateTable.kind(), OperationKind::Ddl);
    }

    #[test]
    fn test_request_wire_aliases() {
        let request: DeleteRequest = serde_json::from_str(
            r#"{"db_name": "shop", "tb_name": "products", "pk_col": "id", "ids": "101,102,105"}"#,
        )
        .unwrap();
        assert_eq!(request.table_name, "products");
        assert_eq!(request.pk_column, "id");

        let request: FetchPageRequest =
            serde_json::from_str(r#"{"db_name": "shop", "table_name": "products"}"#).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.limit, None);
    }

    #[test]
    fn test_insert_request_keeps_data_order() {
        let request: InsertRequest = serde_json::from_str(
            r#"{"db_name": "my_db", "tb_name": "products",
                "data": {"id": "106", "name": "New Product", "price": "99.99", "stock_level": null}}"#,
        )
        .unwrap();
        assert_eq!(
            request.data.columns().collect::<Vec<_>>(),
            vec!["id", "name", "price", "stock_level"]
        );
    }
}
