//! Resumable workflow checkpoints for the Spendguard cost-control layer.
//!
//! A workflow is an ordered list of model-backed steps. The checkpoint
//! captures enough state to resume after a crash without re-running (and
//! re-paying for) steps that already completed. Persistence lives in
//! `spendguard-db`; this crate only owns the data model and transitions.
//!
//! # Modules
//!
//! - [`model`] -- Checkpoint, step, statuses, and the transition methods
//! - [`error`] -- Transition error type

pub mod error;
pub mod model;

pub use error::WorkflowError;
pub use model::{StepStatus, StepUsage, WorkflowCheckpoint, WorkflowStatus, WorkflowStep};
