//! Error types for the response cache.

/// Errors that can occur in the cache layer.
///
/// None of these are fatal to a caller's request: the manager treats a
/// failed lookup as a miss and a failed embedding as "semantic tier
/// unavailable".
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store could not be read or written.
    #[error("cache store error: {0}")]
    Store(String),

    /// The embedding collaborator failed or returned an unusable vector.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
