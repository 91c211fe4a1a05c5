pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod store;
pub mod sync;
pub mod test_utils;
pub mod utils;

pub use error::{Result, StoreError};
pub use store::{TableStore, UpsertResult};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
