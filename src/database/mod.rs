//! Persisted provider metadata.
//!
//! One SQLite file holds one row per provider with each large facet stored
//! as an lz4-compressed JSON blob. Older layouts are detected from the table
//! definition and must be upgraded before use.

pub mod maintenance;
pub mod schema;
pub mod store;

pub use maintenance::{create, diff, merge, needs_upgrade, show_database, upgrade, MergeSummary};
pub use store::ProviderDatabase;
