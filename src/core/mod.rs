//! Core table types: catalog, values, records and schemas.

pub mod record;
pub mod schema;
pub mod table;
pub mod value;

pub use record::Record;
pub use schema::{ColumnSchema, Reconciliation, SchemaRegistry, reconcile, reconcile_records};
pub use table::Table;
pub use value::Value;
