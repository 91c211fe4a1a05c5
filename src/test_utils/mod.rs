//! Shared test utilities for vinestore.
//!
//! Compiled into the library so integration tests and benches can use them.

pub mod fixtures;
pub mod logging;
pub mod memory_remote;

pub use fixtures::StoreFixture;
pub use logging::init_test_tracing;
pub use memory_remote::{MemorySheets, RemoteFault};
