//! Command surface for front ends.
//!
//! A front end (chat bot, dashboard, CLI) sends one [`Command`] and renders
//! the [`CommandOutput`]. Free-form input such as budget amounts arrives as
//! text and is validated here, so a bad value produces a user-facing
//! message and never reaches the budget.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_budget::{AlertFilter, BudgetConfig, BudgetStatus};
use spendguard_cache::CacheStats;
use spendguard_db::WorkflowFilter;
use spendguard_tracker::{Analytics, UserStats};
use spendguard_types::{AlertId, BudgetPeriod, CostAlert, StatsPeriod, WorkflowId};
use spendguard_workflow::{WorkflowCheckpoint, WorkflowStatus};

use crate::controller::{CostController, MaintenanceReport};
use crate::error::CoreError;

const fn default_stats_period() -> StatsPeriod {
    StatsPeriod::Month
}

/// One front-end request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Budget status across all periods.
    Status {
        /// Owner to report on.
        owner_id: String,
    },
    /// Usage statistics.
    Stats {
        /// Owner to report on.
        owner_id: String,
        /// Window; a month when omitted.
        #[serde(default = "default_stats_period")]
        period: StatsPeriod,
    },
    /// Usage statistics plus breakdowns, trend, and plan comparison.
    Analytics {
        /// Owner to report on.
        owner_id: String,
        /// Window; a month when omitted.
        #[serde(default = "default_stats_period")]
        period: StatsPeriod,
    },
    /// Change one budget limit. Both fields are raw user input.
    SetBudget {
        /// Owner whose budget changes.
        owner_id: String,
        /// `daily`, `weekly`, or `monthly`.
        period: String,
        /// New limit in dollars.
        amount: String,
    },
    /// Recent alerts.
    Alerts {
        /// Which alerts to return.
        #[serde(flatten)]
        filter: AlertFilter,
    },
    /// Acknowledge one alert.
    AcknowledgeAlert {
        /// Alert to acknowledge.
        id: AlertId,
    },
    /// Acknowledge every alert.
    AcknowledgeAll,
    /// Stored workflows.
    Workflows {
        /// Only this owner's workflows.
        #[serde(default)]
        owner_id: Option<String>,
        /// Only these statuses.
        #[serde(default)]
        statuses: Vec<WorkflowStatus>,
        /// At most this many.
        #[serde(default)]
        limit: Option<u32>,
    },
    /// One workflow.
    Workflow {
        /// Workflow to load.
        id: WorkflowId,
    },
    /// Delete one workflow.
    DeleteWorkflow {
        /// Workflow to delete.
        id: WorkflowId,
    },
    /// Cache hit rates and sizes.
    CacheStats,
    /// Sweep expired cache entries and prune old workflows and metrics.
    Maintenance,
}

/// Result of a [`Command`], tagged by `kind` with the payload in `data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CommandOutput {
    /// Budget status.
    Status(BudgetStatus),
    /// Usage statistics.
    Stats(UserStats),
    /// Analytics report.
    Analytics(Box<Analytics>),
    /// The budget configuration after an update.
    BudgetUpdated(BudgetConfig),
    /// Matching alerts, newest first.
    Alerts(Vec<CostAlert>),
    /// Number of alerts newly acknowledged.
    Acknowledged(usize),
    /// Matching workflows.
    Workflows(Vec<WorkflowCheckpoint>),
    /// One workflow.
    Workflow(Box<WorkflowCheckpoint>),
    /// Whether the workflow existed.
    Deleted(bool),
    /// Cache counters.
    CacheStats(CacheStats),
    /// Maintenance counts.
    Maintenance(MaintenanceReport),
}

/// Parse a budget amount typed by a user.
///
/// # Errors
///
/// Returns [`CoreError::InvalidCommand`] if the text is not a number or
/// is not positive.
pub fn parse_amount(raw: &str) -> Result<Decimal, CoreError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let Ok(amount) = Decimal::from_str(trimmed) else {
        return Err(CoreError::InvalidCommand(format!(
            "'{raw}' is not a valid amount. Use a number like 10 or 12.50"
        )));
    };
    if amount <= Decimal::ZERO {
        return Err(CoreError::InvalidCommand(format!(
            "Budget amount must be greater than zero, got {amount}"
        )));
    }
    Ok(amount)
}

/// Parse a budget period typed by a user.
///
/// # Errors
///
/// Returns [`CoreError::InvalidCommand`] for anything other than daily,
/// weekly, or monthly.
pub fn parse_period(raw: &str) -> Result<BudgetPeriod, CoreError> {
    let Ok(period) = BudgetPeriod::from_str(&raw.trim().to_lowercase()) else {
        return Err(CoreError::InvalidCommand(format!(
            "'{raw}' is not a budget period. Use daily, weekly, or monthly"
        )));
    };
    Ok(period)
}

impl CostController {
    /// Run one front-end command.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCommand`] for bad user input,
    /// [`CoreError::NotFound`] for unknown alert or workflow ids, and the
    /// underlying error when a subsystem fails.
    pub async fn execute(&self, command: Command) -> Result<CommandOutput, CoreError> {
        tracing::debug!(?command, "Executing command");
        let output = match command {
            Command::Status { owner_id } => CommandOutput::Status(self.status(&owner_id).await?),
            Command::Stats { owner_id, period } => {
                CommandOutput::Stats(self.stats(&owner_id, period)?)
            }
            Command::Analytics { owner_id, period } => {
                CommandOutput::Analytics(Box::new(self.analytics(&owner_id, period)?))
            }
            Command::SetBudget {
                owner_id,
                period,
                amount,
            } => {
                let period = parse_period(&period)?;
                let amount = parse_amount(&amount)?;
                CommandOutput::BudgetUpdated(self.set_budget(&owner_id, period, amount).await?)
            }
            Command::Alerts { filter } => CommandOutput::Alerts(self.alerts().alerts(&filter)),
            Command::AcknowledgeAlert { id } => {
                if !self.alerts().acknowledge(id) {
                    return Err(CoreError::NotFound(format!("alert {id}")));
                }
                CommandOutput::Acknowledged(1)
            }
            Command::AcknowledgeAll => CommandOutput::Acknowledged(self.alerts().acknowledge_all()),
            Command::Workflows {
                owner_id,
                statuses,
                limit,
            } => {
                let filter = WorkflowFilter {
                    owner_id,
                    statuses,
                    limit,
                };
                CommandOutput::Workflows(self.list_workflows(&filter).await?)
            }
            Command::Workflow { id } => {
                let checkpoint = self
                    .workflow(id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("workflow {id}")))?;
                CommandOutput::Workflow(Box::new(checkpoint))
            }
            Command::DeleteWorkflow { id } => CommandOutput::Deleted(self.delete_workflow(id).await?),
            Command::CacheStats => CommandOutput::CacheStats(self.cache_stats().await?),
            Command::Maintenance => CommandOutput::Maintenance(self.maintenance().await?),
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_are_validated() {
        assert_eq!(parse_amount("12.50").ok(), Some(Decimal::new(1250, 2)));
        assert_eq!(parse_amount(" $5 ").ok(), Some(Decimal::new(5, 0)));
        assert!(matches!(parse_amount("lots"), Err(CoreError::InvalidCommand(_))));
        assert!(matches!(parse_amount("0"), Err(CoreError::InvalidCommand(_))));
        assert!(matches!(parse_amount("-3"), Err(CoreError::InvalidCommand(_))));
    }

    #[test]
    fn invalid_amount_message_is_user_facing() {
        let message = parse_amount("ten").err().map(|e| e.to_string());
        assert_eq!(
            message.as_deref(),
            Some("'ten' is not a valid amount. Use a number like 10 or 12.50")
        );
    }

    #[test]
    fn periods_accept_any_case() {
        assert_eq!(parse_period("Weekly").ok(), Some(BudgetPeriod::Weekly));
        assert!(matches!(parse_period("hourly"), Err(CoreError::InvalidCommand(_))));
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let json = r#"{"command":"set_budget","owner_id":"u1","period":"daily","amount":"abc"}"#;
        let command: Result<Command, _> = serde_json::from_str(json);
        assert!(matches!(command, Ok(Command::SetBudget { ref amount, .. }) if amount == "abc"));

        let json = r#"{"command":"stats","owner_id":"u1"}"#;
        let command: Result<Command, _> = serde_json::from_str(json);
        assert!(matches!(
            command,
            Ok(Command::Stats { period: StatsPeriod::Month, .. })
        ));

        let json = r#"{"command":"alerts","unacknowledged_only":true}"#;
        let command: Result<Command, _> = serde_json::from_str(json);
        assert!(matches!(
            command,
            Ok(Command::Alerts { ref filter }) if filter.unacknowledged_only
        ));
    }
}
