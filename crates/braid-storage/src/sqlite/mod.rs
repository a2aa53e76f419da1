//! SQLite-backed storage implementation.

pub(crate) mod blocked;
pub(crate) mod comments;
pub(crate) mod compaction;
pub(crate) mod config;
pub(crate) mod counters;
pub(crate) mod dependencies;
pub(crate) mod issues;
pub(crate) mod labels;
pub(crate) mod queries;
pub mod schema;
pub(crate) mod store;
pub(crate) mod transaction;

pub use store::SqliteStore;
