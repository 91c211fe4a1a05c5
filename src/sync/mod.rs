//! Synchronization between the local files and the remote spreadsheet.
//!
//! Writes land locally first and are mirrored when the remote is healthy;
//! reads treat the remote as the source of truth. Mirrors that fail wait in
//! the [`outbox`] and are replayed on the next contact with the table.

pub mod coordinator;
pub mod outbox;
pub mod selector;

use std::fmt;

use serde::Serialize;

pub use coordinator::{SyncCoordinator, SyncReport, TableSync};
pub use outbox::{Outbox, PendingMirror};
pub use selector::{BackendHandle, BackendSelector, ConnectivityState};

use crate::core::Table;
use crate::storage::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// The remote failed; the process now runs on local files.
    RemoteUnavailable,
    /// The write is stored locally and queued for mirroring.
    MirrorDeferred,
    /// The data returned is the local copy, which may be stale.
    ServedLocal,
    /// A queued mirror could not be applied and was dropped.
    MirrorDropped,
}

/// Non-fatal condition reported alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, table: Option<Table>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table {
            Some(table) => write!(f, "{table}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A result plus the backend that served it and the warnings collected.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    pub served_by: BackendKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub const fn new(value: T, served_by: BackendKind, warnings: Vec<Warning>) -> Self {
        Self {
            value,
            served_by,
            warnings,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            served_by: self.served_by,
            warnings: self.warnings,
        }
    }
}
