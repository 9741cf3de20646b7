//! Error types for workflow state transitions.

use crate::model::{StepStatus, WorkflowStatus};

/// Errors raised by the workflow state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The workflow is not in a state that allows the operation.
    #[error("workflow is {status}, cannot {operation}")]
    InvalidWorkflowState {
        /// Current workflow status.
        status: WorkflowStatus,
        /// What was attempted.
        operation: &'static str,
    },

    /// The current step is not in a state that allows the operation.
    #[error("step '{step}' is {status}, cannot {operation}")]
    InvalidStepState {
        /// Name of the current step.
        step: String,
        /// Current step status.
        status: StepStatus,
        /// What was attempted.
        operation: &'static str,
    },

    /// Every step has already been processed.
    #[error("workflow has no current step")]
    NoCurrentStep,

    /// A loaded checkpoint violates a structural invariant.
    #[error("inconsistent checkpoint: {0}")]
    Inconsistent(String),
}
