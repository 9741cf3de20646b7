//! Error type for the control plane.

use spendguard_budget::BudgetError;
use spendguard_cache::CacheError;
use spendguard_db::DbError;
use spendguard_tracker::TrackerError;
use spendguard_workflow::WorkflowError;

use crate::config::ConfigError;

/// Errors surfaced by [`crate::CostController`] and its helpers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A budget operation was rejected.
    #[error(transparent)]
    Budget(#[from] BudgetError),

    /// Usage could not be recorded or aggregated.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// A workflow transition was not allowed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The durable store failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// The cache failed on a path where failure is not absorbed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A command carried invalid input. The message is user-facing.
    #[error("{0}")]
    InvalidCommand(String),

    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
}
