//! Core entity structs shared between the cache, budget, tracker, and
//! persistence crates.
//!
//! Money is always a [`Decimal`]; nothing in the accounting path touches
//! floating point. Embedding vectors are the one exception, since they are
//! produced by an external model and only ever compared by cosine
//! similarity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{AlertLevel, AlertType, BudgetPeriod, Complexity, ModelTier};
use crate::ids::{AlertId, CacheEntryId, MetricsId};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// A cached model response.
///
/// Visible to lookups only while `now < expires_at`. The only mutation
/// after creation is the `hit_count` bump on a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CacheEntry {
    /// Unique entry identifier.
    pub id: CacheEntryId,
    /// Content-hash key (truncated hex digest of system prompt, prompt, model).
    pub key: String,
    /// Digest of system prompt and model; semantic matches never cross scopes.
    pub scope: String,
    /// Embedding of the prompt, present on semantic-tier entries.
    pub embedding: Option<Vec<f32>>,
    /// The cached response payload.
    pub response: String,
    /// Model that produced the response.
    pub model: String,
    /// Input tokens the original call consumed.
    pub input_tokens: u64,
    /// Output tokens the original call produced.
    pub output_tokens: u64,
    /// Cost of the original call.
    #[ts(as = "String")]
    pub cost: Decimal,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being visible.
    pub expires_at: DateTime<Utc>,
    /// Number of times the entry has been served.
    pub hit_count: u64,
    /// Opaque caller metadata.
    pub metadata: Option<serde_json::Value>,
}

impl CacheEntry {
    /// Whether the entry is still visible at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Total tokens the entry saves per hit.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Rough in-memory footprint, used for the soft `max_size_bytes` cap.
    pub fn approx_size_bytes(&self) -> usize {
        let embedding_bytes = self
            .embedding
            .as_ref()
            .map_or(0, |e| e.len().saturating_mul(size_of::<f32>()));
        let metadata_bytes = self
            .metadata
            .as_ref()
            .map_or(0, |m| m.to_string().len());
        self.response
            .len()
            .saturating_add(self.key.len())
            .saturating_add(self.scope.len())
            .saturating_add(self.model.len())
            .saturating_add(embedding_bytes)
            .saturating_add(metadata_bytes)
    }
}

// ---------------------------------------------------------------------------
// Classification (external collaborator input)
// ---------------------------------------------------------------------------

/// Opaque output of the external prompt classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskClassification {
    /// Free-form task label (e.g. `code`, `summarize`, `chat`).
    pub task_type: String,
    /// Assessed complexity.
    pub complexity: Complexity,
    /// Output length the classifier expects, if it estimated one.
    pub estimated_output_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Immutable record of one request's usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RequestMetrics {
    /// Unique record identifier.
    pub id: MetricsId,
    /// Owner the request was made for.
    pub owner_id: String,
    /// When the request completed.
    pub timestamp: DateTime<Utc>,
    /// Task label from the classifier, if any.
    pub task_type: Option<String>,
    /// Model that served (or would have served) the request.
    pub model: String,
    /// Price tier of the model.
    pub model_tier: ModelTier,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
    /// Cost billed for this request.
    #[ts(as = "String")]
    pub cost: Decimal,
    /// End-to-end latency in milliseconds, if measured.
    pub latency_ms: Option<u64>,
    /// Whether the response came from the cache.
    pub cache_hit: bool,
    /// Whether the request resumed from a workflow checkpoint.
    pub checkpoint_used: bool,
    /// Tokens not billed thanks to caching.
    pub tokens_saved: u64,
    /// Money not spent relative to the baseline or the cached original.
    #[ts(as = "String")]
    pub cost_saved: Decimal,
}

impl RequestMetrics {
    /// Billed tokens for this request.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// A threshold crossing reported by a budget check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BudgetWarning {
    /// Severity derived from the threshold's rank in the configured list.
    pub level: AlertLevel,
    /// Period the warning concerns.
    pub period: BudgetPeriod,
    /// Human-readable message.
    pub message: String,
    /// Percentage of the period limit already spent.
    #[ts(as = "String")]
    pub percent_used: Decimal,
    /// The configured threshold fraction that was crossed.
    #[ts(as = "String")]
    pub threshold: Decimal,
}

/// Derived snapshot of one budget period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BudgetPeriodStatus {
    /// Which period.
    pub period: BudgetPeriod,
    /// Configured limit.
    #[ts(as = "String")]
    pub limit: Decimal,
    /// Spend so far; may exceed `limit`.
    #[ts(as = "String")]
    pub spent: Decimal,
    /// `limit - spent`, clamped at zero.
    #[ts(as = "String")]
    pub remaining: Decimal,
    /// `100 * spent / limit`.
    #[ts(as = "String")]
    pub percent_used: Decimal,
    /// Start of the current period instance.
    pub period_start: DateTime<Utc>,
    /// End of the current period instance (exclusive).
    pub period_end: DateTime<Utc>,
    /// Spend extrapolated linearly to `period_end`.
    #[ts(as = "Option<String>")]
    pub projected_spend: Option<Decimal>,
    /// Amount the projection exceeds `limit` by (zero when under).
    #[ts(as = "Option<String>")]
    pub projected_overage: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// A structured cost alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CostAlert {
    /// Unique alert identifier.
    pub id: AlertId,
    /// Alert category.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Severity.
    pub level: AlertLevel,
    /// Human-readable message.
    pub message: String,
    /// Structured context for the alert.
    pub details: serde_json::Value,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
    /// Whether an operator has acknowledged the alert.
    pub acknowledged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            id: CacheEntryId::new(),
            key: String::from("abc"),
            scope: String::from("scope"),
            embedding: Some(vec![0.5, 0.5]),
            response: String::from("Paris"),
            model: String::from("claude-sonnet-4"),
            input_tokens: 12,
            output_tokens: 3,
            cost: Decimal::new(1, 4),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(10),
            hit_count: 0,
            metadata: None,
        }
    }

    #[test]
    fn entry_visible_until_expiry() {
        let now = Utc::now();
        let e = entry(now);
        assert!(e.is_live(now));
        assert!(e.is_live(now + chrono::Duration::seconds(9)));
        assert!(!e.is_live(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn entry_size_counts_embedding() {
        let e = entry(Utc::now());
        // 5 (response) + 3 (key) + 5 (scope) + 15 (model) + 2 * 4 (embedding)
        assert_eq!(e.approx_size_bytes(), 36);
    }

    #[test]
    fn alert_type_serializes_under_type_key() {
        let alert = CostAlert {
            id: AlertId::new(),
            alert_type: AlertType::BudgetExceeded,
            level: AlertLevel::Critical,
            message: String::from("over"),
            details: serde_json::json!({}),
            created_at: Utc::now(),
            acknowledged: false,
        };
        let value = serde_json::to_value(&alert).unwrap_or_default();
        assert_eq!(
            value.get("type").and_then(serde_json::Value::as_str),
            Some("budget_exceeded")
        );
    }
}
