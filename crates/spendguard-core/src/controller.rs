//! The cost controller: one object wiring cache, budgets, alerts, usage
//! tracking, and workflow checkpoints together.
//!
//! Request lifecycle:
//!
//! ```text
//! lookup ──hit──> tracker.record_cache_hit ──> done (no paid call)
//!    │
//!   miss
//!    │
//! authorize ──denied──> budget_exceeded alert ──> caller stops
//!    │
//! (caller performs the paid call)
//!    │
//! record_usage ──> tracker.record ──> budget.record_spending
//!                                └──> cache.set, high-cost alert
//! ```
//!
//! Budget managers are created lazily, one per owner, and live for the
//! life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_budget::{
    AlertManager, BudgetCheck, BudgetConfig, BudgetConfigUpdate, BudgetManager, BudgetStatus,
};
use spendguard_cache::{CacheLookup, CacheStats, CacheWrite};
use spendguard_db::{CheckpointStore, Database, WorkflowFilter};
use spendguard_tracker::{Analytics, CostTracker, PricingTable, RecordRequest, UserStats};
use spendguard_types::{
    BudgetPeriod, Clock, Complexity, CostAlert, RequestMetrics, StatsPeriod, TaskClassification,
    WorkflowId,
};
use spendguard_workflow::{StepUsage, WorkflowCheckpoint};
use tokio::sync::RwLock;

use crate::cache_backend::{Cache, build_cache};
use crate::config::SpendguardConfig;
use crate::embedding::EmbeddingBackend;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

/// A cache lookup before a paid call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LookupRequest {
    /// User prompt.
    pub prompt: String,
    /// System prompt, if any.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Model the call would go to.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether a semantic match is acceptable.
    #[serde(default = "default_true")]
    pub allow_semantic: bool,
    /// Classifier output, used to label the saved request.
    #[serde(default)]
    pub classification: Option<TaskClassification>,
}

/// A budget check before a paid call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizeRequest {
    /// Model the call will go to.
    pub model: String,
    /// Prompt size in tokens.
    pub input_tokens: u64,
    /// Expected response size. Falls back to the classifier estimate,
    /// then to a complexity-based default.
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Classifier output.
    #[serde(default)]
    pub classification: Option<TaskClassification>,
}

/// Outcome of [`CostController::authorize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authorization {
    /// Estimated cost of the call.
    pub estimated_cost: Decimal,
    /// Output tokens the estimate assumed.
    pub estimated_output_tokens: u64,
    /// The budget decision.
    pub check: BudgetCheck,
    /// Alerts raised by this check.
    pub alerts: Vec<CostAlert>,
}

/// Usage of a completed paid call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UsageReport {
    /// Billing details.
    #[serde(flatten)]
    pub usage: RecordRequest,
    /// Prompt to cache the response under.
    #[serde(default)]
    pub prompt: Option<String>,
    /// System prompt the call used.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Response to cache. Nothing is cached without both prompt and
    /// response.
    #[serde(default)]
    pub response: Option<String>,
    /// Also index the response in the semantic tier.
    #[serde(default = "default_true")]
    pub cache_semantic: bool,
    /// Opaque metadata stored with the cache entry.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of [`CostController::record_usage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageOutcome {
    /// The stored metrics record.
    pub metrics: RequestMetrics,
    /// Budget after the spend.
    pub budget: BudgetStatus,
    /// Whether the response was written to the cache.
    pub cached: bool,
    /// Alerts raised by this report.
    pub alerts: Vec<CostAlert>,
}

/// A transition applied to a stored workflow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Start the current step.
    Start,
    /// Complete the current step.
    Complete {
        /// Step output.
        #[serde(default)]
        output: Option<serde_json::Value>,
        /// Model usage.
        #[serde(default)]
        usage: StepUsage,
    },
    /// Skip the current (running) step.
    Skip {
        /// Why it was skipped.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Fail the current step and the workflow.
    Fail {
        /// Error text.
        error: String,
    },
    /// Pause the workflow.
    Pause,
    /// Resume a paused workflow.
    Resume,
    /// Append a step.
    AddStep {
        /// Step name.
        name: String,
        /// Step input.
        #[serde(default)]
        input: Option<serde_json::Value>,
    },
}

/// Counts from [`CostController::maintenance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Expired cache entries removed.
    pub cache_entries_removed: u64,
    /// Stale workflows deleted.
    pub workflows_pruned: u64,
    /// Old usage records dropped.
    pub metrics_pruned: usize,
}

/// Output tokens assumed when neither the caller nor the classifier
/// supplies an estimate.
const fn default_output_tokens(complexity: Option<Complexity>) -> u64 {
    match complexity {
        Some(Complexity::Low) => 256,
        None | Some(Complexity::Medium) => 1_024,
        Some(Complexity::High) => 4_096,
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Single-process cost-control plane.
#[derive(Debug)]
pub struct CostController {
    config: SpendguardConfig,
    clock: Clock,
    db: Database,
    cache: Cache,
    budgets: RwLock<HashMap<String, Arc<BudgetManager>>>,
    alerts: AlertManager,
    tracker: CostTracker,
    recommended_plans: Mutex<HashMap<String, String>>,
}

impl CostController {
    /// Connect to the configured database, run migrations, and build the
    /// controller.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the database is unreachable and
    /// [`CoreError::Tracker`] for invalid pricing overrides.
    pub async fn from_config(config: SpendguardConfig, clock: Clock) -> Result<Self, CoreError> {
        let db = Database::connect_url(&config.storage.database_url).await?;
        db.run_migrations().await?;
        Self::new(config, db, clock)
    }

    /// Build the controller on an already-migrated database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] for invalid pricing overrides and
    /// [`CoreError::Budget`] for an invalid default budget.
    pub fn new(config: SpendguardConfig, db: Database, clock: Clock) -> Result<Self, CoreError> {
        config.budget.validate()?;
        config.alerts.validate()?;
        let pricing = PricingTable::with_overrides(&config.pricing)?;
        let embedder = EmbeddingBackend::from_config(&config.embedding);
        let cache = build_cache(
            config.storage.cache_backend,
            config.cache.clone(),
            &db,
            embedder,
            clock.clone(),
        );
        let alerts = AlertManager::new(config.alerts.clone(), clock.clone());
        let tracker = CostTracker::new(pricing, clock.clone());

        Ok(Self {
            config,
            clock,
            db,
            cache,
            budgets: RwLock::new(HashMap::new()),
            alerts,
            tracker,
            recommended_plans: Mutex::new(HashMap::new()),
        })
    }

    /// Active configuration.
    pub const fn config(&self) -> &SpendguardConfig {
        &self.config
    }

    /// The controller's clock.
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The database handle.
    pub const fn db(&self) -> &Database {
        &self.db
    }

    /// The alert manager, for registering handlers.
    pub const fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// The usage tracker.
    pub const fn tracker(&self) -> &CostTracker {
        &self.tracker
    }

    /// The budget manager for `owner_id`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Budget`] if the default budget is invalid.
    pub async fn budget(&self, owner_id: &str) -> Result<Arc<BudgetManager>, CoreError> {
        if let Some(manager) = self.budgets.read().await.get(owner_id) {
            return Ok(Arc::clone(manager));
        }
        let mut budgets = self.budgets.write().await;
        if let Some(manager) = budgets.get(owner_id) {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(BudgetManager::new(
            self.config.budget.clone(),
            self.clock.clone(),
        )?);
        budgets.insert(owner_id.to_owned(), Arc::clone(&manager));
        tracing::debug!(%owner_id, "Budget manager created");
        Ok(manager)
    }

    // -----------------------------------------------------------------------
    // Request lifecycle
    // -----------------------------------------------------------------------

    /// Consult the cache. A hit is credited to the owner's savings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] if the saving cannot be recorded.
    /// Cache failures are absorbed as misses.
    pub async fn lookup(
        &self,
        owner_id: &str,
        request: &LookupRequest,
    ) -> Result<Option<CacheLookup>, CoreError> {
        let hit = self
            .cache
            .get(
                &request.prompt,
                request.system_prompt.as_deref(),
                request.model.as_deref(),
                request.allow_semantic,
            )
            .await;
        if let Some(found) = &hit {
            let task = request.classification.as_ref().map(|c| c.task_type.clone());
            self.tracker.record_cache_hit(owner_id, &found.entry, task)?;
        }
        Ok(hit)
    }

    /// Estimate the cost of a call and check it against the owner's budget.
    ///
    /// Threshold warnings and denials are emitted as alerts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] if the model cannot be priced and
    /// [`CoreError::Budget`] if the budget state is unusable.
    pub async fn authorize(
        &self,
        owner_id: &str,
        request: &AuthorizeRequest,
    ) -> Result<Authorization, CoreError> {
        let classification = request.classification.as_ref();
        let estimated_output_tokens = request
            .output_tokens
            .or_else(|| classification.and_then(|c| c.estimated_output_tokens))
            .unwrap_or_else(|| default_output_tokens(classification.map(|c| c.complexity)));
        let estimated_cost = self
            .tracker
            .pricing()
            .try_cost(&request.model, request.input_tokens, estimated_output_tokens)?;

        let budget = self.budget(owner_id).await?;
        let check = budget.check_budget(estimated_cost)?;

        let mut alerts: Vec<CostAlert> = check
            .warnings
            .iter()
            .map(|w| self.alerts.budget_warning(owner_id, w))
            .collect();
        alerts.extend(self.alerts.budget_exceeded(owner_id, estimated_cost, &check));

        tracing::debug!(
            %owner_id,
            model = %request.model,
            %estimated_cost,
            allowed = check.allowed,
            "Budget check"
        );
        Ok(Authorization {
            estimated_cost,
            estimated_output_tokens,
            check,
            alerts,
        })
    }

    /// Record a completed call: metrics, spend, cache write, alerts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] or [`CoreError::Budget`] if the
    /// usage cannot be recorded. A failed cache write is only logged.
    pub async fn record_usage(
        &self,
        owner_id: &str,
        report: UsageReport,
    ) -> Result<UsageOutcome, CoreError> {
        let UsageReport {
            usage,
            prompt,
            system_prompt,
            response,
            cache_semantic,
            metadata,
        } = report;
        let metrics = self.tracker.record(owner_id, usage)?;
        let budget = self.budget(owner_id).await?.record_spending(metrics.cost)?;

        let mut alerts = Vec::new();
        alerts.extend(
            self.alerts
                .high_cost_request(owner_id, &metrics.model, metrics.cost),
        );

        let mut cached = false;
        if let (Some(prompt), Some(response), false) = (prompt, response, metrics.cache_hit) {
            let write = CacheWrite {
                system_prompt,
                input_tokens: metrics.input_tokens,
                output_tokens: metrics.output_tokens,
                cost: metrics.cost,
                enable_semantic: cache_semantic,
                metadata,
                ..CacheWrite::new(metrics.model.clone())
            };
            match self.cache.set(&prompt, &response, write).await {
                Ok(entry) => cached = entry.is_some(),
                Err(e) => tracing::warn!(error = %e, %owner_id, "Cache write failed"),
            }
        }

        Ok(UsageOutcome {
            metrics,
            budget,
            cached,
            alerts,
        })
    }

    // -----------------------------------------------------------------------
    // Budgets and analytics
    // -----------------------------------------------------------------------

    /// Current budget status for `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Budget`] if the budget state is unusable.
    pub async fn status(&self, owner_id: &str) -> Result<BudgetStatus, CoreError> {
        Ok(self.budget(owner_id).await?.status()?)
    }

    /// Change one period limit for `owner_id` without resetting spend.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Budget`] if the amount is not positive.
    pub async fn set_budget(
        &self,
        owner_id: &str,
        period: BudgetPeriod,
        amount: Decimal,
    ) -> Result<BudgetConfig, CoreError> {
        let config = self
            .budget(owner_id)
            .await?
            .update_config(&BudgetConfigUpdate::period(period, amount))?;
        tracing::info!(%owner_id, %period, %amount, "Budget limit updated");
        Ok(config)
    }

    /// Usage statistics for `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] if the metrics stream is unusable.
    pub fn stats(&self, owner_id: &str, period: StatsPeriod) -> Result<UserStats, CoreError> {
        Ok(self.tracker.stats(owner_id, period)?)
    }

    /// Analytics for `owner_id`. When a plan becomes the recommendation
    /// (or the recommendation changes) a subscription alert is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Tracker`] if the metrics stream is unusable.
    pub fn analytics(&self, owner_id: &str, period: StatsPeriod) -> Result<Analytics, CoreError> {
        let tiers = &self.config.subscriptions;
        let analytics = self.tracker.analytics(owner_id, period, tiers)?;
        let comparison = &analytics.subscription;

        if let Some(tier) = comparison.recommended_tier(tiers) {
            let changed = self.recommended_plans.lock().is_ok_and(|mut plans| {
                plans.insert(owner_id.to_owned(), tier.name.clone()).as_deref()
                    != Some(tier.name.as_str())
            });
            if changed {
                self.alerts.subscription_recommended(
                    owner_id,
                    &tier.name,
                    tier.monthly_price,
                    comparison.projected_monthly_spend,
                    comparison.recommended,
                );
            }
        } else if let Ok(mut plans) = self.recommended_plans.lock() {
            plans.remove(owner_id);
        }
        Ok(analytics)
    }

    /// Cache effectiveness counters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cache`] if a store cannot be sized.
    pub async fn cache_stats(&self) -> Result<CacheStats, CoreError> {
        Ok(self.cache.stats().await?)
    }

    /// Drop one request from both cache tiers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cache`] if a store fails.
    pub async fn invalidate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<bool, CoreError> {
        Ok(self.cache.invalidate(prompt, system_prompt, model).await?)
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Create and persist a running workflow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCommand`] for an empty step list and
    /// [`CoreError::Db`] if the save fails.
    pub async fn create_workflow(
        &self,
        owner_id: &str,
        name: &str,
        steps: Vec<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<WorkflowCheckpoint, CoreError> {
        if steps.is_empty() {
            return Err(CoreError::InvalidCommand(String::from(
                "A workflow needs at least one step",
            )));
        }
        let checkpoint = WorkflowCheckpoint::new(owner_id, name, steps, metadata, self.clock.now());
        CheckpointStore::new(self.db.pool()).save(&checkpoint).await?;
        tracing::info!(workflow_id = %checkpoint.id, %owner_id, name, "Workflow created");
        Ok(checkpoint)
    }

    /// Load a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the row is unreadable.
    pub async fn workflow(&self, id: WorkflowId) -> Result<Option<WorkflowCheckpoint>, CoreError> {
        Ok(CheckpointStore::new(self.db.pool()).get(id).await?)
    }

    /// Apply `action` to a stored workflow and persist the result.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown id and
    /// [`CoreError::Workflow`] for a transition the state machine refuses.
    pub async fn apply_step(
        &self,
        id: WorkflowId,
        action: StepAction,
    ) -> Result<WorkflowCheckpoint, CoreError> {
        let store = CheckpointStore::new(self.db.pool());
        let mut checkpoint = store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow {id}")))?;
        let now = self.clock.now();
        match action {
            StepAction::Start => {
                checkpoint.start_step(now)?;
            }
            StepAction::Complete { output, usage } => checkpoint.complete_step(output, usage, now)?,
            StepAction::Skip { reason } => checkpoint.skip_step(reason, now)?,
            StepAction::Fail { error } => checkpoint.fail_step(error, now)?,
            StepAction::Pause => checkpoint.pause(now)?,
            StepAction::Resume => checkpoint.resume(now)?,
            StepAction::AddStep { name, input } => {
                checkpoint.add_step(name, input, now)?;
            }
        }
        store.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Workflows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] on a query failure.
    pub async fn list_workflows(
        &self,
        filter: &WorkflowFilter,
    ) -> Result<Vec<WorkflowCheckpoint>, CoreError> {
        Ok(CheckpointStore::new(self.db.pool()).list(filter).await?)
    }

    /// Resumable workflows, with any step interrupted mid-run reset to
    /// pending and saved.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] on a query or save failure.
    pub async fn resume_workflows(
        &self,
        owner_id: Option<&str>,
        include_paused: bool,
    ) -> Result<Vec<WorkflowCheckpoint>, CoreError> {
        let store = CheckpointStore::new(self.db.pool());
        let mut workflows = store.list_resumable(owner_id, include_paused, None).await?;
        let now = self.clock.now();
        for checkpoint in &mut workflows {
            if checkpoint.prepare_resume(now) {
                store.save(checkpoint).await?;
            }
        }
        Ok(workflows)
    }

    /// Delete a workflow. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Db`] if the delete fails.
    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<bool, CoreError> {
        Ok(CheckpointStore::new(self.db.pool()).delete(id).await?)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Sweep expired cache entries, prune stale workflows and old usage
    /// records.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub async fn maintenance(&self) -> Result<MaintenanceReport, CoreError> {
        let now = self.clock.now();
        let storage = &self.config.storage;

        let cache_entries_removed = self.cache.cleanup().await?;
        let workflows_pruned = CheckpointStore::new(self.db.pool())
            .delete_old(days_before(now, storage.workflow_retention_days))
            .await?;
        let metrics_pruned = self
            .tracker
            .prune_before(days_before(now, storage.metrics_retention_days))?;

        let report = MaintenanceReport {
            cache_entries_removed,
            workflows_pruned,
            metrics_pruned,
        };
        tracing::info!(?report, "Maintenance finished");
        Ok(report)
    }
}

fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
