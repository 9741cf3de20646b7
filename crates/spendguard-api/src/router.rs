//! Axum router construction for the Spendguard API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete router.
///
/// Routes:
/// - `GET /health`
/// - `POST /v1/owners/{owner}/lookup` -- consult the cache
/// - `POST /v1/owners/{owner}/authorize` -- budget check for a planned call
/// - `POST /v1/owners/{owner}/usage` -- record a completed call
/// - `GET /v1/owners/{owner}/budget` -- budget status
/// - `PUT /v1/owners/{owner}/budget/{period}` -- change one limit
/// - `GET /v1/owners/{owner}/stats` and `/analytics` -- usage reports
/// - `GET /v1/alerts`, `POST /v1/alerts/ack`, `POST /v1/alerts/{id}/ack`
/// - `GET|POST /v1/workflows`, `POST /v1/workflows/resume`
/// - `GET|DELETE /v1/workflows/{id}`, `POST /v1/workflows/{id}/steps`
/// - `GET /v1/cache/stats`, `POST /v1/cache/invalidate`
/// - `POST /v1/maintenance`
/// - `POST /v1/commands` -- the tagged command surface
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Request lifecycle
        .route("/v1/owners/{owner}/lookup", post(handlers::lookup))
        .route("/v1/owners/{owner}/authorize", post(handlers::authorize))
        .route("/v1/owners/{owner}/usage", post(handlers::record_usage))
        // Budgets and reports
        .route("/v1/owners/{owner}/budget", get(handlers::budget_status))
        .route("/v1/owners/{owner}/budget/{period}", put(handlers::set_budget))
        .route("/v1/owners/{owner}/stats", get(handlers::stats))
        .route("/v1/owners/{owner}/analytics", get(handlers::analytics))
        // Alerts
        .route("/v1/alerts", get(handlers::list_alerts))
        .route("/v1/alerts/ack", post(handlers::acknowledge_all))
        .route("/v1/alerts/{id}/ack", post(handlers::acknowledge_alert))
        // Workflows
        .route(
            "/v1/workflows",
            get(handlers::list_workflows).post(handlers::create_workflow),
        )
        .route("/v1/workflows/resume", post(handlers::resume_workflows))
        .route(
            "/v1/workflows/{id}",
            get(handlers::get_workflow).delete(handlers::delete_workflow),
        )
        .route("/v1/workflows/{id}/steps", post(handlers::apply_step))
        // Cache and maintenance
        .route("/v1/cache/stats", get(handlers::cache_stats))
        .route("/v1/cache/invalidate", post(handlers::invalidate))
        .route("/v1/maintenance", post(handlers::maintenance))
        .route("/v1/commands", post(handlers::execute_command))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
