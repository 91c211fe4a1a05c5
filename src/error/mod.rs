//! Error handling for vinestore.
//!
//! This module provides:
//! - [`StoreError`]: The error enum for every store operation
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Rich error type with suggestion and context

mod codes;

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for store operations.
///
/// Only `StorageUnavailable`, `SchemaConflict` and `MalformedRecord` reach
/// callers of the table store. `RemoteUnavailable` is produced by the remote
/// adapter and always converted into a fallback decision plus a warning.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Schema conflict on '{table}': {reason}")]
    SchemaConflict { table: String, reason: String },

    #[error("Malformed record for '{table}', column '{column}': {reason}")]
    MalformedRecord {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl StoreError {
    pub(crate) fn schema_conflict(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(
        table: impl Into<String>,
        column: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            table: table.into(),
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that only mean "the spreadsheet could not be used".
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }

    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::RemoteUnavailable(_) => ErrorCode::RemoteUnavailable,
            Self::SchemaConflict { .. } => ErrorCode::SchemaConflict,
            Self::MalformedRecord { .. } => ErrorCode::MalformedRecord,
            Self::UnknownTable(_) => ErrorCode::UnknownTable,
            Self::Config(_) | Self::Toml(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::SchemaConflict { table, reason } => {
                Some(serde_json::json!({ "table": table, "reason": reason }))
            }
            Self::MalformedRecord {
                table,
                column,
                reason,
            } => Some(serde_json::json!({ "table": table, "column": column, "reason": reason })),
            Self::UnknownTable(name) => Some(serde_json::json!({ "table": name })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_store_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "SCHEMA_CONFLICT")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 102)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    pub recoverable: bool,

    /// Error category (e.g., "table", "storage")
    pub category: String,
}

impl StructuredError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_store_error(err: &StoreError) -> Self {
        let code = err.code();
        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion: suggest_for_error(code, err.context().as_ref()),
            context: err.context(),
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
        }
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&StoreError> for StructuredError {
    fn from(err: &StoreError) -> Self {
        Self::from_store_error(err)
    }
}

/// Context-aware suggestion; falls back to the static text of the code.
fn suggest_for_error(code: ErrorCode, context: Option<&Value>) -> String {
    let field = |name: &str| {
        context
            .and_then(|c| c.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match (code, field("table"), field("column")) {
        (ErrorCode::UnknownTable, Some(table), _) => format!(
            "'{table}' is not a known table. Run `vinestore tables` to list tables and aliases"
        ),
        (ErrorCode::MalformedRecord, Some(table), Some(column)) => format!(
            "Column '{column}' of '{table}' must hold text, a finite number or a boolean"
        ),
        _ => code.suggestion().to_string(),
    }
}

/// Result type alias using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;
