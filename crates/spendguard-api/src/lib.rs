//! HTTP API for the Spendguard cost-control layer.
//!
//! An Axum server exposing the [`CostController`] request lifecycle
//! (cache lookup, budget authorization, usage recording), budget and
//! analytics reports, alerts, workflow checkpoints, and the tagged command
//! surface as JSON over HTTP.
//!
//! Errors are returned as `{"error": "...", "status": N}`.
//!
//! [`CostController`]: spendguard_core::CostController

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerError, spawn_maintenance, start_server};
pub use state::AppState;
