//! Model pricing, per-request cost tracking, and usage analytics for the
//! Spendguard cost-control layer.
//!
//! All monetary calculations use [`rust_decimal::Decimal`]. Rates are
//! dollars per million tokens.
//!
//! # Modules
//!
//! - [`pricing`] -- Model rate table with prefix lookup
//! - [`tracker`] -- Append-only metrics stream and per-owner stats
//! - [`analytics`] -- Breakdowns, trend, subscription comparison
//! - [`error`] -- Tracker error type

pub mod analytics;
pub mod error;
pub mod pricing;
pub mod tracker;

pub use analytics::{
    Analytics, ModelBreakdown, PAY_PER_USE, SubscriptionComparison, SubscriptionOption,
    SubscriptionTier, TaskBreakdown, Trend,
};
pub use error::TrackerError;
pub use pricing::{LONG_CONTEXT_THRESHOLD, ModelPricing, PricingTable};
pub use tracker::{CostTracker, RecordRequest, UserStats};
