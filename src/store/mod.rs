//! SQLite persistence for sync bookkeeping and the local store

pub mod db;
pub mod local;
pub mod migrations;
pub mod sync_store;

pub use local::SqliteLocalRepository;
pub use sync_store::{NewRetryItem, RetryItemFilter, SqliteSyncStore, SyncRetryItem, SyncStore};
