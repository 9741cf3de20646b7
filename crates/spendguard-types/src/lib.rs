//! Shared type definitions for the Spendguard cost-control layer.
//!
//! This crate is the single source of truth for the entities that cross
//! subsystem boundaries: cache entries, request metrics, budget warnings,
//! period snapshots, and cost alerts. Types flow downstream to `TypeScript`
//! via `ts-rs` for the dashboard front end.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for entity identifiers
//! - [`enums`] -- Periods, alert levels/types, tiers, trend directions
//! - [`structs`] -- Entity structs shared between crates
//! - [`clock`] -- Injectable wall clock
//! - [`math`] -- Ratio helpers for stats

pub mod clock;
pub mod enums;
pub mod ids;
pub mod math;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use clock::Clock;
pub use enums::{
    AlertLevel, AlertType, BudgetPeriod, Complexity, MatchType, ModelTier, StatsPeriod,
    TrendDirection,
};
pub use ids::{AlertId, CacheEntryId, MetricsId, StepId, WorkflowId};
pub use structs::{
    BudgetPeriodStatus, BudgetWarning, CacheEntry, CostAlert, RequestMetrics, TaskClassification,
};
