//! `SQLite` data layer for the Spendguard cost-control layer.
//!
//! Two things need to outlive the process: workflow checkpoints (so a
//! crashed multi-step workflow resumes without re-paying for finished
//! steps) and, optionally, cached responses.
//!
//! ```text
//! Database (SqlitePool, embedded migrations)
//!     |
//!     +-- CheckpointStore   (workflows: upsert, get, list, prune)
//!     +-- SqliteCacheStore  (cache_entries: CacheStore impl, one per tier)
//! ```
//!
//! # Modules
//!
//! - [`sqlite`] -- Pool configuration, connection, migrations
//! - [`checkpoint_store`] -- Workflow checkpoint persistence
//! - [`cache_store`] -- Durable cache tier storage
//! - [`error`] -- Shared error type

pub mod cache_store;
pub mod checkpoint_store;
pub mod error;
pub mod sqlite;

pub use cache_store::{CacheTier, SqliteCacheStore};
pub use checkpoint_store::{CheckpointStore, WorkflowFilter, WorkflowRow};
pub use error::DbError;
pub use sqlite::{Database, SqliteConfig};
