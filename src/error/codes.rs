//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Table/record errors
//! - 3xx: Config errors
//! - 5xx: Remote errors
//! - 6xx: Local storage errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for robot mode output.
///
/// Each variant maps to a numeric code (e.g., `UnknownTable` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Table/record errors (1xx)
    // ========================================
    /// E101: Table name is not part of the catalog
    UnknownTable,
    /// E102: Upsert key columns are missing or ambiguous
    SchemaConflict,
    /// E103: A value cannot be stored as a scalar cell
    MalformedRecord,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,
    /// E304: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Remote errors (5xx)
    // ========================================
    /// E501: Remote spreadsheet unreachable or misconfigured
    RemoteUnavailable,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Local table files cannot be read or written
    StorageUnavailable,
    /// E605: Serialization/deserialization failed
    SerializationError,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E906: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `UnknownTable` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::UnknownTable => 101,
            Self::SchemaConflict => 102,
            Self::MalformedRecord => 103,

            Self::ConfigInvalid => 302,
            Self::ConfigMissingRequired => 304,

            Self::RemoteUnavailable => 501,

            Self::StorageUnavailable => 601,
            Self::SerializationError => 605,

            Self::IoError => 906,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::UnknownTable => "Run `vinestore tables` to list the known tables and their aliases",
            Self::SchemaConflict => "Give a non-empty value for every key column, or pass --key to pick other key columns",
            Self::MalformedRecord => "Cells hold text, finite numbers or booleans. Nest structured data only in the table's JSON columns",

            Self::ConfigInvalid => "Check TOML syntax in the config file, or run with --config <path>",
            Self::ConfigMissingRequired => "Set the required value in config.toml or through the matching VINESTORE_* variable",

            Self::RemoteUnavailable => "Writes stay safe locally and are mirrored on the next successful contact. Run `vinestore status` to check the spreadsheet",

            Self::StorageUnavailable => "Check permissions and free space on the data directory",
            Self::SerializationError => "The data format may be corrupted. Check input data for validity",

            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::UnknownTable
            | Self::SchemaConflict
            | Self::MalformedRecord
            | Self::ConfigInvalid
            | Self::ConfigMissingRequired
            | Self::RemoteUnavailable
            | Self::StorageUnavailable
            | Self::IoError => true,

            Self::SerializationError => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "table",
            3 => "config",
            5 => "remote",
            6 => "storage",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::UnknownTable,
            Self::SchemaConflict,
            Self::MalformedRecord,
            Self::ConfigInvalid,
            Self::ConfigMissingRequired,
            Self::RemoteUnavailable,
            Self::StorageUnavailable,
            Self::SerializationError,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
