//! Paginated Row Fetching
//!
//! Returns one bounded window of a table plus its total row count. Column order comes from
//! introspection, so every row is a record of exactly the described columns. Windows are
//! ordered by the primary key when the table has one.

use serde::{Deserialize, Serialize};

use crate::engine::Session;
use crate::error::{QuarryError, Result};
use crate::marshal::{NativeValue, RowRecord, ValueMarshaller};
use crate::schema::{ColumnDescriptor, SchemaIntrospector, TableDescriptor};
use crate::sql::SqlBuilder;

/// Page size used when a request does not name one
pub const DEFAULT_PAGE_LIMIT: u64 = 50;

/// Validated page window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    table_name: String,
    page: u64,
    limit: u64,
}

impl PageRequest {
    /// Validate a 1-based page and a page size no larger than `max_limit`
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn new(table_name: impl Into<String>, page: i64, limit: i64, max_limit: u64) -> Result<Self> {
        let page = u64::try_from(page)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| QuarryError::validation(format!("page must be at least 1 (got {page})")))?;
        let limit = u64::try_from(limit)
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| QuarryError::validation(format!("limit must be at least 1 (got {limit})")))?;
        if limit > max_limit {
            return Err(QuarryError::validation(format!(
                "limit {limit} exceeds the maximum page size {max_limit}"
            )));
        }

        Ok(Self { table_name: table_name.into(), page, limit })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub const fn page(&self) -> u64 {
        self.page
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// `(page - 1) * limit`; `None` when the window starts beyond any addressable row
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        (self.page - 1).checked_mul(self.limit)
    }
}

/// One window of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Column names in table order
    pub columns: Vec<String>,

    /// Unfiltered row count of the table
    pub total_rows: u64,

    pub rows: Vec<RowRecord>,
    pub page: u64,
    pub limit: u64,
}

/// Structure and size of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub columns: Vec<ColumnDescriptor>,
    pub total_rows: u64,
}

/// Fetches page windows through a session
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginatedRowFetcher {
    introspector: SchemaIntrospector,
    marshaller: ValueMarshaller,
}

impl PaginatedRowFetcher {
    #[must_use]
    pub const fn new(marshaller: ValueMarshaller) -> Self {
        Self { introspector: SchemaIntrospector, marshaller }
    }

    /// Unfiltered row count of `table`
    pub async fn count_rows<S: Session>(&self, session: &mut S, table: &str) -> Result<u64> {
        let statement = SqlBuilder::new(session.dialect()).build_count(table)?;
        tracing::debug!(sql = %statement.sql, "count");
        let rows = session.execute(&statement).await.map_err(QuarryError::into_schema)?;

        rows.rows
            .first()
            .and_then(|row| row.first())
            .and_then(NativeValue::as_u64)
            .ok_or_else(|| QuarryError::schema(format!("row count of '{table}' is not a number")))
    }

    /// Described columns plus total row count
    pub async fn describe_table_structure<S: Session>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<TableSummary> {
        let descriptor = self.described(session, table).await?;
        let total_rows = self.count_rows(session, table).await?;
        Ok(TableSummary { columns: descriptor.columns, total_rows })
    }

    /// Fetch the window `request` names
    ///
    /// A window starting at or past the last row is empty; the SELECT is skipped.
    pub async fn fetch_page<S: Session>(&self, session: &mut S, request: &PageRequest) -> Result<PageResult> {
        let table = request.table_name();
        let descriptor = self.described(session, table).await?;
        let total_rows = self.count_rows(session, table).await?;
        let columns = descriptor.column_names();

        let Some(offset) = request.offset().filter(|offset| *offset < total_rows) else {
            tracing::debug!(page = request.page(), total_rows, "window past the end");
            return Ok(PageResult {
                columns,
                total_rows,
                rows: Vec::new(),
                page: request.page(),
                limit: request.limit(),
            });
        };

        let statement = SqlBuilder::new(session.dialect()).build_select_page(
            table,
            &descriptor.primary_key(),
            request.limit(),
            offset,
        )?;
        tracing::debug!(sql = %statement.sql, "select page");
        let result = session.execute(&statement).await?;

        let rows = result
            .rows
            .into_iter()
            .map(|row| self.marshaller.row_to_record(&columns, row))
            .collect::<Result<Vec<_>>>()?;

        Ok(PageResult { columns, total_rows, rows, page: request.page(), limit: request.limit() })
    }

    /// Introspected table; a missing table is a `Validation` error on every engine
    async fn described<S: Session>(&self, session: &mut S, table: &str) -> Result<TableDescriptor> {
        let descriptor = self.introspector.describe_table(session, table).await?;
        if descriptor.columns.is_empty() {
            return Err(QuarryError::validation(format!(
                "table '{table}' does not exist or has no columns"
            )));
        }
        Ok(descriptor)
    }
}
