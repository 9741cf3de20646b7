//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with context about which operation failed.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt row {id}: {reason}")]
    Corrupt {
        /// Primary key of the offending row.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<DbError> for spendguard_cache::CacheError {
    fn from(err: DbError) -> Self {
        Self::Store(err.to_string())
    }
}
