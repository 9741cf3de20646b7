//! The Spendguard control plane.
//!
//! [`CostController`] wires the response cache, per-owner budgets, the
//! alert manager, the usage tracker, and durable workflow checkpoints into
//! one object a front end can drive, either through its methods or through
//! the [`Command`] surface.
//!
//! ```text
//! SpendguardConfig (YAML + env)
//!     |
//!     v
//! CostController
//!     +-- Cache (exact + semantic, memory or SQLite, lexical or HTTP embedder)
//!     +-- BudgetManager per owner
//!     +-- AlertManager
//!     +-- CostTracker
//!     +-- CheckpointStore (SQLite)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`controller`] -- Request lifecycle, budgets, workflows, maintenance
//! - [`command`] -- Tagged commands for front ends
//! - [`cache_backend`] -- Store selection for the cache tiers
//! - [`embedding`] -- Lexical and HTTP embedding backends
//! - [`retry`] -- Timeout with a single retry for external calls
//! - [`error`] -- Control-plane error type

pub mod cache_backend;
pub mod command;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod error;
pub mod retry;

pub use cache_backend::{Cache, CacheBackend, build_cache};
pub use command::{Command, CommandOutput, parse_amount, parse_period};
pub use config::{
    CacheBackendKind, ConfigError, EmbeddingBackendKind, EmbeddingConfig, LoggingConfig,
    ServerConfig, SpendguardConfig, StorageConfig,
};
pub use controller::{
    AuthorizeRequest, Authorization, CostController, LookupRequest, MaintenanceReport, StepAction,
    UsageOutcome, UsageReport,
};
pub use embedding::{EmbeddingBackend, HttpEmbedder};
pub use error::CoreError;
pub use retry::{RetryError, with_timeout_retry};
