//! Error types for cost tracking.

/// Errors that can occur while recording or aggregating usage.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A record request was malformed.
    #[error("invalid usage record: {0}")]
    InvalidRecord(String),

    /// A pricing override was malformed.
    #[error("invalid pricing for '{model}': {reason}")]
    InvalidPricing {
        /// Model whose pricing was rejected.
        model: String,
        /// What was wrong.
        reason: String,
    },

    /// The pricing table has no entry to price the model with.
    #[error("no pricing available for model '{0}'")]
    NoPricing(String),

    /// The metrics store mutex was poisoned by a panicking thread.
    #[error("metrics store lock poisoned")]
    LockPoisoned,
}
