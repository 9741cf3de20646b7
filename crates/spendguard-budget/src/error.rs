//! Error types for budget enforcement and alerting.
//!
//! A denied request is not an error: it is reported through
//! [`BudgetCheck`](crate::manager::BudgetCheck). Errors here mean the
//! caller passed something invalid or internal state is unusable.

/// Errors that can occur in the budget and alert managers.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    /// A limit or threshold failed validation. Nothing was changed.
    #[error("invalid budget configuration: {0}")]
    InvalidConfig(String),

    /// A spend amount was negative or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Imported state could not be applied.
    #[error("invalid budget state: {0}")]
    InvalidState(String),

    /// An internal mutex was poisoned by a panicking thread.
    #[error("budget state lock poisoned")]
    LockPoisoned,
}
