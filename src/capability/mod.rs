//! Capability Checks
//!
//! Deployments may be read-only or forbid DDL. Every operation is classified and checked
//! before any session is opened, so a blocked request never reaches the database.
//!
//! # Classes
//! - `Read`: test connection, list databases, describe tables, fetch page
//! - `Write`: insert row, delete rows
//! - `Ddl`: create table, drop table, truncate table

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QuarryError, Result};

/// Operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
    Ddl,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Ddl => "DDL",
        })
    }
}

/// What a deployment lets callers do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Reject writes and DDL
    #[serde(default)]
    pub readonly: bool,

    /// Permit CREATE/DROP/TRUNCATE
    #[serde(default = "default_allow_ddl")]
    pub allow_ddl: bool,
}

const fn default_allow_ddl() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { readonly: false, allow_ddl: true }
    }
}

impl Capabilities {
    #[must_use]
    pub const fn read_only() -> Self {
        Self { readonly: true, allow_ddl: false }
    }

    /// Check that `operation` (of class `kind`) is permitted
    pub fn check(&self, operation: &str, kind: OperationKind) -> Result<()> {
        let blocked = match kind {
            OperationKind::Read => false,
            OperationKind::Write => self.readonly,
            OperationKind::Ddl => self.readonly || !self.allow_ddl,
        };

        if blocked {
            let reason = if self.readonly { "the deployment is read-only" } else { "DDL is disabled" };
            return Err(QuarryError::capability_violation(format!(
                "{operation} is a {kind} operation and {reason}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let caps = Capabilities::default();
        for kind in [OperationKind::Read, OperationKind::Write, OperationKind::Ddl] {
            assert!(caps.check("op", kind).is_ok());
        }
    }

    #[test]
    fn test_readonly_blocks_writes_and_ddl() {
        let caps = Capabilities::read_only();
        assert!(caps.check("fetch_page", OperationKind::Read).is_ok());

        let err = caps.check("insert_row", OperationKind::Write).unwrap_err();
        assert!(matches!(err, QuarryError::CapabilityViolation(_)));
        assert!(err.message().contains("read-only"));
        assert!(caps.check("drop_table", OperationKind::Ddl).is_err());
    }

    #[test]
    fn test_ddl_switch() {
        let caps = Capabilities { readonly: false, allow_ddl: false };
        assert!(caps.check("insert_row", OperationKind::Write).is_ok());
        let err = caps.check("truncate_table", OperationKind::Ddl).unwrap_err();
        assert!(err.message().contains("DDL is disabled"));
    }

    #[test]
    fn test_missing_fields_default() {
        let caps: Capabilities = serde_json::from_str("{}").unwrap();
        assert_eq!(caps, Capabilities::default());
    }
}
