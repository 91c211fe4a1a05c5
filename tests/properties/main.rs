//! Property tests for schema reconciliation and natural keys.

mod key_tests;
mod schema_tests;
