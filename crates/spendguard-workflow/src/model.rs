//! Workflow checkpoint data model and state machine.
//!
//! A checkpoint is the full snapshot of a multi-step workflow. Callers
//! mutate it through the transition methods below and persist it after
//! each one; every transition bumps `updated_at`.
//!
//! ```text
//! workflow:  running --> completed | failed | paused
//!            paused  --> running
//! step:      pending --> running --> completed | failed | skipped
//! ```
//!
//! Token and cost totals are recomputed from completed steps on every
//! step transition, never accumulated incrementally.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::{StepId, WorkflowId};
use ts_rs::TS;

use crate::error::WorkflowError;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum WorkflowStatus {
    /// Steps are being executed (or were, before a crash).
    Running,
    /// Every step finished.
    Completed,
    /// A step failed; the workflow is terminal.
    Failed,
    /// Suspended by the caller; can be resumed.
    Paused,
}

impl WorkflowStatus {
    /// Lowercase name used in storage and the wire format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown workflow status '{other}'")),
        }
    }
}

/// Lifecycle state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum StepStatus {
    /// Not started.
    Pending,
    /// Started, no outcome recorded yet.
    Running,
    /// Finished with output.
    Completed,
    /// Finished with an error.
    Failed,
    /// Deliberately not executed.
    Skipped,
}

impl StepStatus {
    /// Lowercase name used in storage and the wire format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step and checkpoint
// ---------------------------------------------------------------------------

/// Model usage reported when a step completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUsage {
    /// Model that served the step.
    #[serde(default)]
    pub model: Option<String>,
    /// Input tokens billed.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens billed.
    #[serde(default)]
    pub output_tokens: u64,
    /// Cost billed.
    #[serde(default)]
    pub cost: Decimal,
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkflowStep {
    /// Unique step identifier.
    pub id: StepId,
    /// Caller-chosen step name.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Input the step runs with.
    pub input: Option<serde_json::Value>,
    /// Output recorded on completion.
    pub output: Option<serde_json::Value>,
    /// Error recorded on failure (or skip reason).
    pub error: Option<String>,
    /// Model that served the step.
    pub model: Option<String>,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
    /// Cost billed.
    #[ts(as = "String")]
    pub cost: Decimal,
    /// When the step last started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a final status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    /// A pending step with no usage.
    pub fn pending(name: impl Into<String>, input: Option<serde_json::Value>) -> Self {
        Self {
            id: StepId::new(),
            name: name.into(),
            status: StepStatus::Pending,
            input,
            output: None,
            error: None,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Durable snapshot of a multi-step workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkflowCheckpoint {
    /// Unique workflow identifier.
    pub id: WorkflowId,
    /// Owner the workflow runs for.
    pub owner_id: String,
    /// Caller-chosen workflow name.
    pub name: String,
    /// Ordered steps.
    pub steps: Vec<WorkflowStep>,
    /// Index of the step to run next; equals `steps.len()` when done.
    pub current_step_index: usize,
    /// Workflow status.
    pub status: WorkflowStatus,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When the workflow last changed.
    pub updated_at: DateTime<Utc>,
    /// Input tokens over completed steps.
    pub total_input_tokens: u64,
    /// Output tokens over completed steps.
    pub total_output_tokens: u64,
    /// Cost over completed steps.
    #[ts(as = "String")]
    pub total_cost: Decimal,
    /// Opaque caller metadata.
    pub metadata: Option<serde_json::Value>,
}

impl WorkflowCheckpoint {
    /// A running workflow with the given pending steps.
    ///
    /// With no steps there is nothing left to run, so the workflow starts
    /// out completed.
    pub fn new<I, S>(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        step_names: I,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<WorkflowStep> = step_names
            .into_iter()
            .map(|n| WorkflowStep::pending(n, None))
            .collect();
        let status = if steps.is_empty() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Running
        };
        Self {
            id: WorkflowId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            steps,
            current_step_index: 0,
            status,
            created_at: now,
            updated_at: now,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: Decimal::ZERO,
            metadata,
        }
    }

    /// The step at `current_step_index`, if any remain.
    pub fn current_step(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.current_step_index)
    }

    /// Whether every step has been processed.
    pub fn all_steps_done(&self) -> bool {
        self.current_step_index >= self.steps.len()
    }

    /// Whether the workflow can be picked up again after a restart.
    pub const fn is_resumable(&self) -> bool {
        matches!(self.status, WorkflowStatus::Running | WorkflowStatus::Paused)
    }

    /// Completed steps over total steps.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }

    // -----------------------------------------------------------------------
    // Workflow transitions
    // -----------------------------------------------------------------------

    fn require_status(
        &self,
        allowed: &[WorkflowStatus],
        operation: &'static str,
    ) -> Result<(), WorkflowError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidWorkflowState {
                status: self.status,
                operation,
            })
        }
    }

    /// Append a pending step. Allowed while running or paused.
    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        input: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<StepId, WorkflowError> {
        self.require_status(&[WorkflowStatus::Running, WorkflowStatus::Paused], "add a step")?;
        let step = WorkflowStep::pending(name, input);
        let id = step.id;
        self.steps.push(step);
        self.updated_at = now;
        Ok(id)
    }

    /// Suspend a running workflow.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.require_status(&[WorkflowStatus::Running], "pause")?;
        self.status = WorkflowStatus::Paused;
        self.updated_at = now;
        Ok(())
    }

    /// Resume a paused workflow.
    ///
    /// A step left running is reset to pending so it re-executes.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.require_status(&[WorkflowStatus::Paused], "resume")?;
        self.status = WorkflowStatus::Running;
        self.prepare_resume(now);
        self.updated_at = now;
        Ok(())
    }

    /// Reset an interrupted step after a crash.
    ///
    /// If the current step is `running` it goes back to `pending` and
    /// loses its start time. Returns whether anything changed.
    pub fn prepare_resume(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(step) = self.steps.get_mut(self.current_step_index) else {
            return false;
        };
        if step.status != StepStatus::Running {
            return false;
        }
        step.status = StepStatus::Pending;
        step.started_at = None;
        tracing::info!(
            workflow_id = %self.id,
            step = %step.name,
            "Interrupted step reset to pending"
        );
        self.updated_at = now;
        true
    }

    // -----------------------------------------------------------------------
    // Step transitions
    // -----------------------------------------------------------------------

    fn current_mut(
        &mut self,
        expected: StepStatus,
        operation: &'static str,
    ) -> Result<&mut WorkflowStep, WorkflowError> {
        self.require_status(&[WorkflowStatus::Running], operation)?;
        let step = self
            .steps
            .get_mut(self.current_step_index)
            .ok_or(WorkflowError::NoCurrentStep)?;
        if step.status != expected {
            return Err(WorkflowError::InvalidStepState {
                step: step.name.clone(),
                status: step.status,
                operation,
            });
        }
        Ok(step)
    }

    /// Move the current step from pending to running.
    pub fn start_step(&mut self, now: DateTime<Utc>) -> Result<StepId, WorkflowError> {
        let step = self.current_mut(StepStatus::Pending, "start")?;
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        let id = step.id;
        self.updated_at = now;
        Ok(id)
    }

    /// Finish the current step with `output` and `usage`, then advance.
    ///
    /// Completing the last step completes the workflow.
    pub fn complete_step(
        &mut self,
        output: Option<serde_json::Value>,
        usage: StepUsage,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let step = self.current_mut(StepStatus::Running, "complete")?;
        step.status = StepStatus::Completed;
        step.output = output;
        step.model = usage.model;
        step.input_tokens = usage.input_tokens;
        step.output_tokens = usage.output_tokens;
        step.cost = usage.cost;
        step.completed_at = Some(now);
        self.advance(now);
        Ok(())
    }

    /// Finish the current step as skipped, then advance.
    pub fn skip_step(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        let step = self.current_mut(StepStatus::Running, "skip")?;
        step.status = StepStatus::Skipped;
        step.error = reason;
        step.completed_at = Some(now);
        self.advance(now);
        Ok(())
    }

    /// Fail the current step and, with it, the workflow.
    pub fn fail_step(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        let step = self.current_mut(StepStatus::Running, "fail")?;
        step.status = StepStatus::Failed;
        step.error = Some(error.into());
        step.completed_at = Some(now);
        self.status = WorkflowStatus::Failed;
        self.recompute_totals();
        self.updated_at = now;
        Ok(())
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.current_step_index = self.current_step_index.saturating_add(1).min(self.steps.len());
        self.recompute_totals();
        if self.all_steps_done() {
            self.status = WorkflowStatus::Completed;
        }
        self.updated_at = now;
    }

    /// Recompute token and cost totals from completed steps.
    pub fn recompute_totals(&mut self) {
        let mut input = 0u64;
        let mut output = 0u64;
        let mut cost = Decimal::ZERO;
        for step in self.steps.iter().filter(|s| s.status == StepStatus::Completed) {
            input = input.saturating_add(step.input_tokens);
            output = output.saturating_add(step.output_tokens);
            cost = cost.saturating_add(step.cost);
        }
        self.total_input_tokens = input;
        self.total_output_tokens = output;
        self.total_cost = cost;
    }

    /// Check the structural invariants of a loaded checkpoint.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.current_step_index > self.steps.len() {
            return Err(WorkflowError::Inconsistent(format!(
                "current_step_index {} beyond {} steps",
                self.current_step_index,
                self.steps.len()
            )));
        }
        if self.status == WorkflowStatus::Completed && !self.all_steps_done() {
            return Err(WorkflowError::Inconsistent(String::from(
                "completed workflow has unprocessed steps",
            )));
        }
        if self.updated_at < self.created_at {
            return Err(WorkflowError::Inconsistent(String::from(
                "updated_at precedes created_at",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0)
            .single()
            .unwrap_or_default()
    }

    fn workflow() -> WorkflowCheckpoint {
        WorkflowCheckpoint::new("u1", "report", ["outline", "draft", "polish"], None, t0())
    }

    fn usage(cost: Decimal) -> StepUsage {
        StepUsage {
            model: Some(String::from("claude-sonnet-4")),
            input_tokens: 1_000,
            output_tokens: 500,
            cost,
        }
    }

    #[test]
    fn happy_path_completes_and_totals() {
        let mut wf = workflow();
        let mut now = t0();
        for cost in [dec!(0.01), dec!(0.02), dec!(0.03)] {
            now += Duration::seconds(10);
            assert!(wf.start_step(now).is_ok());
            assert!(wf.complete_step(Some(json!({"ok": true})), usage(cost), now).is_ok());
        }
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.current_step_index, 3);
        assert_eq!(wf.total_cost, dec!(0.06));
        assert_eq!(wf.total_input_tokens, 3_000);
        assert_eq!(wf.updated_at, now);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn skipped_steps_do_not_count_toward_totals() {
        let mut wf = workflow();
        wf.start_step(t0()).ok();
        wf.complete_step(None, usage(dec!(0.5)), t0()).ok();
        wf.start_step(t0()).ok();
        assert!(wf.skip_step(Some(String::from("not needed")), t0()).is_ok());
        assert_eq!(wf.current_step().map(|s| s.name.as_str()), Some("polish"));
        assert_eq!(wf.total_cost, dec!(0.5));
        assert_eq!(wf.progress(), (1, 3));
    }

    #[test]
    fn step_failure_fails_the_workflow() {
        let mut wf = workflow();
        wf.start_step(t0()).ok();
        assert!(wf.fail_step("rate limited", t0()).is_ok());
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert!(!wf.is_resumable());
        assert!(matches!(
            wf.start_step(t0()),
            Err(WorkflowError::InvalidWorkflowState { status: WorkflowStatus::Failed, .. })
        ));
    }

    #[test]
    fn cannot_complete_a_pending_step() {
        let mut wf = workflow();
        assert!(matches!(
            wf.complete_step(None, StepUsage::default(), t0()),
            Err(WorkflowError::InvalidStepState { status: StepStatus::Pending, .. })
        ));
    }

    #[test]
    fn crash_recovery_resets_running_step() {
        let mut wf = workflow();
        wf.start_step(t0()).ok();
        // Process dies here; the stored snapshot still says running.
        let later = t0() + Duration::minutes(5);
        assert!(wf.prepare_resume(later));
        assert_eq!(wf.current_step().map(|s| s.status), Some(StepStatus::Pending));
        assert_eq!(wf.current_step().and_then(|s| s.started_at), None);
        assert!(!wf.prepare_resume(later));
        assert!(wf.start_step(later).is_ok());
    }

    #[test]
    fn pause_and_resume() {
        let mut wf = workflow();
        wf.start_step(t0()).ok();
        assert!(wf.pause(t0()).is_ok());
        assert!(wf.is_resumable());
        assert!(wf.start_step(t0()).is_err());
        assert!(wf.pause(t0()).is_err());

        assert!(wf.resume(t0()).is_ok());
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert_eq!(wf.current_step().map(|s| s.status), Some(StepStatus::Pending));
    }

    #[test]
    fn steps_can_be_appended_while_running() {
        let mut wf = WorkflowCheckpoint::new("u1", "chat", ["first"], None, t0());
        wf.start_step(t0()).ok();
        assert!(wf.add_step("second", Some(json!({"q": 2})), t0()).is_ok());
        wf.complete_step(None, usage(dec!(0.01)), t0()).ok();
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert_eq!(wf.current_step().map(|s| s.name.as_str()), Some("second"));
    }

    #[test]
    fn completed_workflow_is_terminal() {
        let mut wf = WorkflowCheckpoint::new("u1", "one", ["only"], None, t0());
        wf.start_step(t0()).ok();
        wf.complete_step(None, usage(dec!(0.01)), t0()).ok();
        assert!(wf.add_step("late", None, t0()).is_err());
        assert!(wf.pause(t0()).is_err());
        assert!(wf.resume(t0()).is_err());
    }

    #[test]
    fn workflow_without_steps_is_already_completed() {
        let wf = WorkflowCheckpoint::new("u1", "empty", Vec::<String>::new(), None, t0());
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.all_steps_done());
        assert!(!wf.is_resumable());
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn validate_catches_bad_index() {
        let mut wf = workflow();
        wf.current_step_index = 7;
        assert!(matches!(wf.validate(), Err(WorkflowError::Inconsistent(_))));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>(), Ok(status));
        }
    }
}
