/// dbgate Error Module
///
/// This module defines the closed set of error kinds a gateway operation can
/// fail with. Driver errors never leave the gateway as-is: they are rendered
/// into one of these variants at the point of failure, together with the
/// query text or table name needed to diagnose them.
use std::fmt::Display;
use thiserror::Error;

/// Table name recorded when the driver does not surface one.
pub const UNKNOWN_TABLE: &str = "unknown";

/// Every failure a gateway operation can report.
///
/// The set is closed on purpose so that callers can match exhaustively:
/// - Connection setup (open, timeout parsing, health probe)
/// - Statement execution, including BEGIN/COMMIT/ROLLBACK
/// - Duplicate table creation
/// - Missing tables (reserved for callers)
/// - Query arguments that are not text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The underlying connect call failed
    #[error("{message}")]
    ConnectionFailure { message: String },

    /// The driver reported an execution error
    #[error("{message} Query: {query}")]
    ExecutionFailure { message: String, query: String },

    /// A CREATE TABLE hit an existing table
    #[error("{message} Table name: {table}")]
    TableAlreadyExists { message: String, table: String },

    /// A table lookup failed. Never raised by the gateway itself.
    #[error("{message} Table name: {table}")]
    TableNotFound { message: String, table: String },

    /// The query argument was not a text value
    #[error("{message} Query: {query}")]
    InvalidQuery { message: String, query: String },
}

impl GatewayError {
    pub fn connection(cause: impl Display) -> Self {
        GatewayError::ConnectionFailure {
            message: format!("Connection error: {}", cause),
        }
    }

    pub fn execution(query: impl Into<String>, cause: impl Display) -> Self {
        GatewayError::ExecutionFailure {
            message: format!("Query execution error: {}", cause),
            query: query.into(),
        }
    }

    pub fn table_exists(table: impl Into<String>, cause: impl Display) -> Self {
        GatewayError::TableAlreadyExists {
            message: format!("Table already exists: {}", cause),
            table: table.into(),
        }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        GatewayError::TableNotFound {
            message: "Table not found.".to_string(),
            table: table.into(),
        }
    }

    pub fn invalid_query(query: impl Into<String>) -> Self {
        GatewayError::InvalidQuery {
            message: "Query must be a text value.".to_string(),
            query: query.into(),
        }
    }

    /// The message without the appended query/table context.
    pub fn message(&self) -> &str {
        match self {
            GatewayError::ConnectionFailure { message }
            | GatewayError::ExecutionFailure { message, .. }
            | GatewayError::TableAlreadyExists { message, .. }
            | GatewayError::TableNotFound { message, .. }
            | GatewayError::InvalidQuery { message, .. } => message,
        }
    }

    /// The offending query text, for the variants that carry one.
    pub fn query(&self) -> Option<&str> {
        match self {
            GatewayError::ExecutionFailure { query, .. }
            | GatewayError::InvalidQuery { query, .. } => Some(query),
            _ => None,
        }
    }

    /// The table name, for the table variants.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            GatewayError::TableAlreadyExists { table, .. }
            | GatewayError::TableNotFound { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// Type alias for Result to use GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conn_err = GatewayError::connection("unable to open database file");
        insta::assert_snapshot!(conn_err.to_string(), @"Connection error: unable to open database file");

        let exec_err = GatewayError::execution("SELECT * FROM nope", "no such table: nope");
        insta::assert_snapshot!(exec_err.to_string(), @"Query execution error: no such table: nope Query: SELECT * FROM nope");

        let exists_err = GatewayError::table_exists("t", "table t already exists");
        insta::assert_snapshot!(exists_err.to_string(), @"Table already exists: table t already exists Table name: t");

        let missing_err = GatewayError::table_not_found("users");
        insta::assert_snapshot!(missing_err.to_string(), @"Table not found. Table name: users");

        let invalid_err = GatewayError::invalid_query("[0xff, 0xfe]");
        insta::assert_snapshot!(invalid_err.to_string(), @"Query must be a text value. Query: [0xff, 0xfe]");
    }

    #[test]
    fn test_accessors() {
        let err = GatewayError::execution("DELETE FROM t", "database is locked");
        assert_eq!(err.query(), Some("DELETE FROM t"));
        assert_eq!(err.table_name(), None);
        assert_eq!(err.message(), "Query execution error: database is locked");

        let err = GatewayError::table_exists(UNKNOWN_TABLE, "boom");
        assert_eq!(err.table_name(), Some("unknown"));
        assert_eq!(err.query(), None);

        let err = GatewayError::connection("boom");
        assert_eq!(err.query(), None);
        assert_eq!(err.table_name(), None);
    }

    #[test]
    fn test_driver_text_is_not_truncated() {
        let long_cause = "x".repeat(4096);
        let err = GatewayError::execution("SELECT 1", &long_cause);
        assert!(err.to_string().contains(&long_cause));
    }
}
