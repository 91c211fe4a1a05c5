//! Storage layer for vinestore
//!
//! Implements dual persistence: JSON files on the local disk, always
//! available, and a shared Google Sheets spreadsheet when credentials exist.

pub mod backend;
pub mod local;
pub mod sheets;

pub use backend::{Applied, BackendKind, Mutation, RowChange, TableBackend, TableSnapshot};
pub use local::LocalBackend;
pub use sheets::{RetryConfig, SheetsBackend};
