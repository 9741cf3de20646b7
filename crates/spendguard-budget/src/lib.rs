//! Budget enforcement and cost alerting for the Spendguard cost-control
//! layer.
//!
//! [`BudgetManager`] decides whether a request may proceed given one
//! owner's spend over UTC-aligned daily, weekly, and monthly windows, and
//! reports threshold crossings once per period. [`AlertManager`] turns
//! those decisions (and expensive requests) into [`CostAlert`]s, keeps a
//! bounded history, and fans them out to registered handlers.
//!
//! [`CostAlert`]: spendguard_types::CostAlert
//!
//! # Modules
//!
//! - [`config`] -- Limits, thresholds, alert floors
//! - [`period`] -- Window arithmetic
//! - [`threshold`] -- Tier evaluation and per-period dedup
//! - [`manager`] -- The budget manager
//! - [`alerts`] -- The alert manager
//! - [`error`] -- Budget error type

pub mod alerts;
pub mod config;
pub mod error;
pub mod manager;
pub mod period;
pub mod threshold;

pub use alerts::{AlertFilter, AlertHandler, AlertManager, HandlerRegistration};
pub use config::{AlertConfig, BudgetConfig, BudgetConfigUpdate};
pub use error::BudgetError;
pub use manager::{BudgetCheck, BudgetLimit, BudgetManager, BudgetSnapshot, BudgetStatus, PeriodSnapshot};
pub use period::PeriodWindow;
pub use threshold::{Crossing, ThresholdTracker};
