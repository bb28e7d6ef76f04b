//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format for all Quarry operations.
//! All operations return either a `SuccessEnvelope` or an `ErrorEnvelope`.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "operation": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "operation": "...", "error": {"code": "...", "status": 400, "message": "..."}}`

use serde::{Deserialize, Serialize};

use crate::error::QuarryError;
use crate::orchestrator::Failure;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine behind the deployment (mysql, sqlite)
    pub engine: String,

    /// Operation that was executed (`fetch_page`, `insert_row`, ...)
    pub operation: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(engine: impl Into<String>, operation: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), operation: operation.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub engine: String,

    /// Operation that was attempted
    pub operation: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(engine: impl Into<String>, operation: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), operation: operation.into(), error }
    }

    /// Create error envelope from `QuarryError`
    pub fn from_error(engine: impl Into<String>, operation: impl Into<String>, err: &QuarryError) -> Self {
        Self::new(engine, operation, ErrorInfo::from(Failure::from(err)))
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "`VALIDATION_FAILED`", "`CONNECTION_FAILED`")
    pub code: String,

    /// HTTP-style status
    pub status: u16,

    /// Human-readable error message (no credentials)
    pub message: String,
}

impl From<Failure> for ErrorInfo {
    fn from(failure: Failure) -> Self {
        Self { code: failure.code, status: failure.status, message: failure.message }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Rows in the payload (page fetches)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,

    /// Rows changed (mutations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None, rows_affected: None }
    }

    #[must_use]
    pub const fn with_rows(mut self, rows_returned: usize) -> Self {
        self.rows_returned = Some(rows_returned);
        self
    }

    #[must_use]
    pub const fn with_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = Some(rows_affected);
        self
    }
}
