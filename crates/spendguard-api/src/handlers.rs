//! REST endpoint handlers.
//!
//! Every handler delegates to the shared [`CostController`]. Budget changes
//! and alert or workflow listings go through the same [`Command`] path a
//! chat front end uses, so input validation is identical on both surfaces.
//!
//! [`CostController`]: spendguard_core::CostController

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use spendguard_budget::AlertFilter;
use spendguard_core::{
    AuthorizeRequest, Command, CommandOutput, CoreError, LookupRequest, StepAction, UsageReport,
};
use spendguard_types::{AlertId, StatsPeriod, WorkflowId};
use spendguard_workflow::WorkflowStatus;

use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

/// Query parameters for the stats and analytics endpoints.
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    /// `day`, `week`, `month` (default), or `all`.
    pub period: Option<String>,
}

/// Body for `PUT /v1/owners/{owner}/budget/{period}`.
#[derive(Debug, Deserialize)]
pub struct SetBudgetBody {
    /// New limit, as a JSON number or string.
    pub amount: serde_json::Value,
}

/// Query parameters for `GET /v1/workflows`.
#[derive(Debug, Deserialize)]
pub struct WorkflowsQuery {
    /// Only this owner's workflows.
    pub owner_id: Option<String>,
    /// Comma-separated statuses, e.g. `running,paused`.
    pub status: Option<String>,
    /// At most this many.
    pub limit: Option<u32>,
}

/// Body for `POST /v1/workflows`.
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowBody {
    /// Owner of the workflow.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Step names in execution order.
    pub steps: Vec<String>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body for `POST /v1/workflows/resume`.
#[derive(Debug, Default, Deserialize)]
pub struct ResumeBody {
    /// Only this owner's workflows.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Also return paused workflows.
    #[serde(default)]
    pub include_paused: bool,
}

/// Body for `POST /v1/cache/invalidate`.
#[derive(Debug, Deserialize)]
pub struct InvalidateBody {
    /// User prompt of the cached request.
    pub prompt: String,
    /// System prompt of the cached request.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Model of the cached request.
    #[serde(default)]
    pub model: Option<String>,
}

fn parse_stats_period(query: &PeriodQuery) -> Result<StatsPeriod, ApiError> {
    query.period.as_deref().map_or(Ok(StatsPeriod::Month), |raw| {
        StatsPeriod::from_str(raw).map_err(ApiError::InvalidRequest)
    })
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    WorkflowId::from_str(raw)
        .map_err(|e| ApiError::InvalidRequest(format!("workflow id '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness probe.
#[allow(clippy::unused_async)]
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

/// Consult the cache before a paid call.
///
/// # Errors
///
/// Returns [`ApiError`] if a cache hit cannot be credited.
pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Json(body): Json<LookupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let found = state.controller.lookup(&owner, &body).await?;
    Ok(Json(serde_json::json!({
        "hit": found.is_some(),
        "lookup": found,
    })))
}

/// Check a planned call against the owner's budget.
///
/// # Errors
///
/// Returns [`ApiError`] if the budget state is unusable.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Json(body): Json<AuthorizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.authorize(&owner, &body).await?))
}

/// Record a completed call.
///
/// # Errors
///
/// Returns [`ApiError`] for an invalid report or a store failure.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Json(body): Json<UsageReport>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.controller.record_usage(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

// ---------------------------------------------------------------------------
// Budgets and reports
// ---------------------------------------------------------------------------

/// Budget status across periods.
///
/// # Errors
///
/// Returns [`ApiError`] if the budget state is unusable.
pub async fn budget_status(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.status(&owner).await?))
}

/// Change one period limit.
///
/// # Errors
///
/// Returns 400 for an unknown period or a non-positive amount.
pub async fn set_budget(
    State(state): State<Arc<AppState>>,
    Path((owner, period)): Path<(String, String)>,
    Json(body): Json<SetBudgetBody>,
) -> Result<impl IntoResponse, ApiError> {
    let amount = match body.amount {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    let output = state
        .controller
        .execute(Command::SetBudget {
            owner_id: owner,
            period,
            amount,
        })
        .await?;
    Ok(Json(output))
}

/// Usage statistics.
///
/// # Errors
///
/// Returns 400 for an unknown period.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let period = parse_stats_period(&query)?;
    Ok(Json(state.controller.stats(&owner, period)?))
}

/// Analytics report.
///
/// # Errors
///
/// Returns 400 for an unknown period.
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let period = parse_stats_period(&query)?;
    Ok(Json(state.controller.analytics(&owner, period)?))
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Recent alerts, newest first.
#[allow(clippy::unused_async)]
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AlertFilter>,
) -> impl IntoResponse {
    let alerts = state.controller.alerts().alerts(&filter);
    Json(serde_json::json!({
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

/// Acknowledge one alert.
///
/// # Errors
///
/// Returns 404 for an unknown alert id.
pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = AlertId::from_str(&id)
        .map_err(|e| ApiError::InvalidRequest(format!("alert id '{id}': {e}")))?;
    Ok(Json(state.controller.execute(Command::AcknowledgeAlert { id }).await?))
}

/// Acknowledge every alert.
///
/// # Errors
///
/// Infallible in practice; shares the command path.
pub async fn acknowledge_all(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.execute(Command::AcknowledgeAll).await?))
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Stored workflows, most recently updated first.
///
/// # Errors
///
/// Returns 400 for an unknown status.
pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let statuses = query
        .status
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| WorkflowStatus::from_str(s.trim()))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(ApiError::InvalidRequest)?
        .unwrap_or_default();
    let output = state
        .controller
        .execute(Command::Workflows {
            owner_id: query.owner_id,
            statuses,
            limit: query.limit,
        })
        .await?;
    Ok(Json(output))
}

/// Create a workflow.
///
/// # Errors
///
/// Returns [`ApiError`] if the save fails.
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWorkflowBody>,
) -> Result<impl IntoResponse, ApiError> {
    let checkpoint = state
        .controller
        .create_workflow(&body.owner_id, &body.name, body.steps, body.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(checkpoint)))
}

/// One workflow.
///
/// # Errors
///
/// Returns 404 for an unknown id.
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workflow_id(&id)?;
    let checkpoint = state
        .controller
        .workflow(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("workflow {id}")))?;
    Ok(Json(checkpoint))
}

/// Delete a workflow.
///
/// # Errors
///
/// Returns 404 if the workflow did not exist.
pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workflow_id(&id)?;
    match state.controller.execute(Command::DeleteWorkflow { id }).await? {
        CommandOutput::Deleted(true) => Ok(StatusCode::NO_CONTENT),
        _ => Err(CoreError::NotFound(format!("workflow {id}")).into()),
    }
}

/// Apply a step transition.
///
/// # Errors
///
/// Returns 404 for an unknown id and 409 for a refused transition.
pub async fn apply_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(action): Json<StepAction>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_workflow_id(&id)?;
    Ok(Json(state.controller.apply_step(id, action).await?))
}

/// Resumable workflows, with interrupted steps reset.
///
/// # Errors
///
/// Returns [`ApiError`] on a store failure.
pub async fn resume_workflows(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ResumeBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let workflows = state
        .controller
        .resume_workflows(body.owner_id.as_deref(), body.include_paused)
        .await?;
    Ok(Json(serde_json::json!({
        "count": workflows.len(),
        "workflows": workflows,
    })))
}

// ---------------------------------------------------------------------------
// Cache and maintenance
// ---------------------------------------------------------------------------

/// Cache counters.
///
/// # Errors
///
/// Returns [`ApiError`] if a store cannot be sized.
pub async fn cache_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.cache_stats().await?))
}

/// Drop one request from the cache.
///
/// # Errors
///
/// Returns [`ApiError`] if a store fails.
pub async fn invalidate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvalidateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .controller
        .invalidate(&body.prompt, body.system_prompt.as_deref(), body.model.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// Run a maintenance sweep now.
///
/// # Errors
///
/// Returns [`ApiError`] if a store fails.
pub async fn maintenance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.maintenance().await?))
}

/// Run one tagged command.
///
/// # Errors
///
/// Returns 400 for invalid input and 404 for unknown ids.
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.controller.execute(command).await?))
}
