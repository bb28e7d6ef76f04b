//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Quarry.
//! Every component returns one of these typed failures; the orchestrator is the only layer
//! that turns them into a transport-facing status/code/message triple.
//!
//! # Error Categories
//! - `Connection`: bad credentials, unreachable host, unknown database
//! - `Schema`: introspection failures
//! - `Validation`: malformed request shape (empty column list, bad identifier, page < 1)
//! - `Execution`: the engine rejected a statement
//! - `Marshal`: a native value has no representation in the transport model
//! - `CapabilityViolation`: operation blocked by deployment capabilities
//! - `Config`: configuration file or environment errors

use thiserror::Error;

/// Main error type for Quarry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuarryError {
    /// Session could not be opened
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Introspection failed
    #[error("Schema introspection failed: {0}")]
    Schema(String),

    /// Malformed request
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Statement rejected by the engine
    #[error("Statement execution failed: {0}")]
    Execution(String),

    /// Value cannot be marshaled
    #[error("Unsupported value: {0}")]
    Marshal(String),

    /// Operation blocked by capability constraints
    #[error("Capability violation: {0}")]
    CapabilityViolation(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QuarryError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_FAILED",
            Self::Schema(_) => "SCHEMA_FAILED",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Execution(_) => "EXECUTION_FAILED",
            Self::Marshal(_) => "MARSHAL_FAILED",
            Self::CapabilityViolation(_) => "CAPABILITY_VIOLATION",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Human-readable message, safe to return to callers.
    ///
    /// Never contains credentials: drivers echo the user name at most.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal(message.into())
    }

    pub fn capability_violation(message: impl Into<String>) -> Self {
        Self::CapabilityViolation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Re-tag an execution failure raised during introspection as a schema failure.
    ///
    /// Connection failures keep their kind.
    #[must_use]
    pub fn into_schema(self) -> Self {
        match self {
            Self::Execution(detail) | Self::Marshal(detail) => Self::Schema(detail),
            other => other,
        }
    }
}

/// Result type alias for Quarry operations
pub type Result<T> = std::result::Result<T, QuarryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QuarryError::connection("x").error_code(), "CONNECTION_FAILED");
        assert_eq!(QuarryError::schema("x").error_code(), "SCHEMA_FAILED");
        assert_eq!(QuarryError::validation("x").error_code(), "VALIDATION_FAILED");
        assert_eq!(QuarryError::execution("x").error_code(), "EXECUTION_FAILED");
        assert_eq!(QuarryError::marshal("x").error_code(), "MARSHAL_FAILED");
        assert_eq!(QuarryError::capability_violation("x").error_code(), "CAPABILITY_VIOLATION");
        assert_eq!(QuarryError::config("x").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_messages() {
        let err = QuarryError::validation("CREATE TABLE requires at least one column");
        assert!(err.message().contains("at least one column"));
        assert!(err.message().starts_with("Invalid request"));
    }

    #[test]
    fn test_into_schema() {
        assert!(matches!(QuarryError::execution("boom").into_schema(), QuarryError::Schema(_)));
        assert!(matches!(
            QuarryError::connection("gone").into_schema(),
            QuarryError::Connection(_)
        ));
        assert!(matches!(
            QuarryError::validation("bad").into_schema(),
            QuarryError::Validation(_)
        ));
    }
}
