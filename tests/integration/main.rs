//! Integration tests for the table store.

mod sheets_http_tests;
mod store_local_tests;
mod store_remote_tests;
