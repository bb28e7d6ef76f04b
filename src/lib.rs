//! Quarry - Credential-Driven Database Administration
//!
//! Quarry is a small administration backend for MySQL/MariaDB and SQLite. Every request
//! carries its own credentials; nothing is pooled or remembered between operations.
//!
//! # Core Principles
//! - One connection per operation, always closed
//! - Writes commit on success and roll back on any failure
//! - Identifiers are allow-listed and quoted, values are always bound
//! - Engine values are marshaled into JSON-safe shapes before they leave the library
//!
//! # Architecture
//! This library provides the core functionality for both the CLI and the JSON-RPC tool
//! server. Both are thin wrappers over [`CrudOrchestrator`].
//!
//! # Module Organization
//! - [`error`] - Error taxonomy
//! - [`marshal`] - Engine value to transport value conversion
//! - [`engine`] - Connection manager trait and engine implementations
//! - [`sql`] - Identifier validation and statement building
//! - [`schema`] - Database, table and column introspection
//! - [`pagination`] - Page arithmetic and row fetching
//! - [`capability`] - Read-only and DDL gates
//! - [`config`] - Layered configuration
//! - [`orchestrator`] - Operation lifecycle
//! - [`output`] - JSON output envelopes
//! - [`rpc`] - JSON-RPC 2.0 tool server

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod orchestrator;
pub mod output;
pub mod pagination;
pub mod rpc;
pub mod schema;
pub mod sql;

pub use capability::{Capabilities, OperationKind};
pub use config::{ConfigLayer, ConfigLocation, QuarryConfig};
pub use engine::{
    AnyConnector, ConnectionInfo, ConnectionManager, Credentials, DatabaseType, Dialect, Session,
    Statement,
};
pub use error::{QuarryError, Result};
pub use marshal::{ColumnValues, MarshaledValue, RowRecord, ValueMarshaller};
pub use orchestrator::{CrudOrchestrator, MutationOutcome, Operation, Settings};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use pagination::{PageRequest, PageResult, PaginatedRowFetcher};
pub use schema::{ColumnDescriptor, SchemaIntrospector, TableDescriptor};
pub use sql::SqlBuilder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        let caps = Capabilities::default();
        assert!(!caps.readonly);
        assert_eq!(DatabaseType::SQLite.as_str(), "sqlite");
        assert_eq!(Operation::ALL.len(), 9);

        let builder = SqlBuilder::new(Dialect::Sqlite);
        assert_eq!(builder.dialect(), Dialect::Sqlite);
    }
}
