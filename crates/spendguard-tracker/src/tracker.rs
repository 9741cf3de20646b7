//! Per-request usage recording and per-owner statistics.
//!
//! The tracker keeps an append-only in-memory stream of
//! [`RequestMetrics`]. Statistics are recomputed from the stream on
//! demand, so there is no aggregate state to drift out of sync.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::math::ratio;
use spendguard_types::{CacheEntry, Clock, MetricsId, ModelTier, RequestMetrics, StatsPeriod};

use crate::error::TrackerError;
use crate::pricing::PricingTable;

/// Usage of one completed request, as reported by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRequest {
    /// Model that served the request.
    pub model: String,
    /// Classifier task label.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
    /// End-to-end latency.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Whether the response came from the cache.
    #[serde(default)]
    pub cache_hit: bool,
    /// Whether the request resumed a checkpointed workflow.
    #[serde(default)]
    pub checkpoint_used: bool,
    /// What the request would have cost without optimization.
    #[serde(default)]
    pub baseline_cost: Option<Decimal>,
}

/// Aggregate usage for one owner over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    /// Owner the stats describe.
    pub owner_id: String,
    /// Window the stats cover.
    pub period: StatsPeriod,
    /// Requests recorded, cache hits included.
    pub total_requests: u64,
    /// Input tokens billed.
    pub input_tokens: u64,
    /// Output tokens billed.
    pub output_tokens: u64,
    /// Money spent.
    pub total_cost: Decimal,
    /// Tokens not billed thanks to caching.
    pub tokens_saved: u64,
    /// Money not spent thanks to caching and cheaper routing.
    pub cost_saved: Decimal,
    /// Requests served from the cache.
    pub cache_hits: u64,
    /// `cache_hits / total_requests`.
    pub cache_hit_rate: f64,
    /// Requests that resumed a checkpoint.
    pub checkpoint_requests: u64,
    /// Mean latency over requests that reported one.
    pub average_latency_ms: Option<u64>,
    /// Request count per model.
    pub requests_by_model: BTreeMap<String, u64>,
    /// Request count per task label; unlabeled requests count as `unknown`.
    pub requests_by_task: BTreeMap<String, u64>,
}

impl UserStats {
    /// Aggregate `records` (already filtered to one owner and window).
    pub fn from_records(owner_id: &str, period: StatsPeriod, records: &[RequestMetrics]) -> Self {
        let mut stats = Self {
            owner_id: owner_id.to_owned(),
            period,
            total_requests: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_cost: Decimal::ZERO,
            tokens_saved: 0,
            cost_saved: Decimal::ZERO,
            cache_hits: 0,
            cache_hit_rate: 0.0,
            checkpoint_requests: 0,
            average_latency_ms: None,
            requests_by_model: BTreeMap::new(),
            requests_by_task: BTreeMap::new(),
        };
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;

        for r in records {
            stats.total_requests = stats.total_requests.saturating_add(1);
            stats.input_tokens = stats.input_tokens.saturating_add(r.input_tokens);
            stats.output_tokens = stats.output_tokens.saturating_add(r.output_tokens);
            stats.total_cost = stats.total_cost.saturating_add(r.cost);
            stats.tokens_saved = stats.tokens_saved.saturating_add(r.tokens_saved);
            stats.cost_saved = stats.cost_saved.saturating_add(r.cost_saved);
            if r.cache_hit {
                stats.cache_hits = stats.cache_hits.saturating_add(1);
            }
            if r.checkpoint_used {
                stats.checkpoint_requests = stats.checkpoint_requests.saturating_add(1);
            }
            if let Some(ms) = r.latency_ms {
                latency_sum = latency_sum.saturating_add(ms);
                latency_count = latency_count.saturating_add(1);
            }
            bump(&mut stats.requests_by_model, &r.model);
            bump(&mut stats.requests_by_task, task_label(r));
        }

        stats.cache_hit_rate = ratio(stats.cache_hits, stats.total_requests);
        stats.average_latency_ms = latency_sum.checked_div(latency_count);
        stats
    }

    /// Billed tokens.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Task label for grouping; unlabeled requests group as `unknown`.
pub fn task_label(record: &RequestMetrics) -> &str {
    record.task_type.as_deref().unwrap_or("unknown")
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    let count = map.entry(key.to_owned()).or_insert(0);
    *count = count.saturating_add(1);
}

/// Append-only usage store with pricing.
#[derive(Debug)]
pub struct CostTracker {
    pricing: PricingTable,
    clock: Clock,
    records: Mutex<Vec<RequestMetrics>>,
}

impl CostTracker {
    /// Create an empty tracker.
    pub const fn new(pricing: PricingTable, clock: Clock) -> Self {
        Self {
            pricing,
            clock,
            records: Mutex::new(Vec::new()),
        }
    }

    /// The pricing table in use.
    pub const fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// The tracker's clock.
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Price and append one request.
    pub fn record(&self, owner_id: &str, request: RecordRequest) -> Result<RequestMetrics, TrackerError> {
        if request.model.trim().is_empty() {
            return Err(TrackerError::InvalidRecord(String::from("model is required")));
        }
        if request.baseline_cost.is_some_and(|b| b.is_sign_negative()) {
            return Err(TrackerError::InvalidRecord(String::from(
                "baseline cost must not be negative",
            )));
        }

        let pricing = self
            .pricing
            .resolve(&request.model)
            .ok_or_else(|| TrackerError::NoPricing(request.model.clone()))?;
        let cost = pricing.cost(request.input_tokens, request.output_tokens);
        let model_tier = pricing.tier;
        let cost_saved = request
            .baseline_cost
            .map_or(Decimal::ZERO, |b| b.saturating_sub(cost).max(Decimal::ZERO));

        let metrics = RequestMetrics {
            id: MetricsId::new(),
            owner_id: owner_id.to_owned(),
            timestamp: self.clock.now(),
            task_type: request.task_type,
            model: request.model,
            model_tier,
            input_tokens: request.input_tokens,
            output_tokens: request.output_tokens,
            cost,
            latency_ms: request.latency_ms,
            cache_hit: request.cache_hit,
            checkpoint_used: request.checkpoint_used,
            tokens_saved: 0,
            cost_saved,
        };
        self.append(metrics)
    }

    /// Append a zero-cost record for a cache hit, crediting the cached
    /// entry's tokens and cost as saved.
    pub fn record_cache_hit(
        &self,
        owner_id: &str,
        entry: &CacheEntry,
        task_type: Option<String>,
    ) -> Result<RequestMetrics, TrackerError> {
        let model_tier = self
            .pricing
            .lookup(&entry.model)
            .map_or(ModelTier::Standard, |(_, p)| p.tier);
        let metrics = RequestMetrics {
            id: MetricsId::new(),
            owner_id: owner_id.to_owned(),
            timestamp: self.clock.now(),
            task_type,
            model: entry.model.clone(),
            model_tier,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            latency_ms: None,
            cache_hit: true,
            checkpoint_used: false,
            tokens_saved: entry.total_tokens(),
            cost_saved: entry.cost,
        };
        self.append(metrics)
    }

    fn append(&self, metrics: RequestMetrics) -> Result<RequestMetrics, TrackerError> {
        let Ok(mut records) = self.records.lock() else {
            return Err(TrackerError::LockPoisoned);
        };
        records.push(metrics.clone());
        tracing::debug!(
            owner_id = %metrics.owner_id,
            model = %metrics.model,
            cost = %metrics.cost,
            cache_hit = metrics.cache_hit,
            "Usage recorded"
        );
        Ok(metrics)
    }

    /// Records for `owner_id` with `from <= timestamp < to`.
    pub fn records_between(
        &self,
        owner_id: &str,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RequestMetrics>, TrackerError> {
        let Ok(records) = self.records.lock() else {
            return Err(TrackerError::LockPoisoned);
        };
        Ok(records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .filter(|r| from.is_none_or(|f| r.timestamp >= f) && r.timestamp < to)
            .cloned()
            .collect())
    }

    /// Records for `owner_id` inside `period`, ending now.
    pub fn records(&self, owner_id: &str, period: StatsPeriod) -> Result<Vec<RequestMetrics>, TrackerError> {
        let now = self.clock.now();
        let from = window_start(period, now);
        // Inclusive of records stamped exactly now.
        let to = now
            .checked_add_signed(chrono::Duration::milliseconds(1))
            .unwrap_or(now);
        self.records_between(owner_id, from, to)
    }

    /// Aggregate usage for `owner_id` over `period`.
    pub fn stats(&self, owner_id: &str, period: StatsPeriod) -> Result<UserStats, TrackerError> {
        let records = self.records(owner_id, period)?;
        Ok(UserStats::from_records(owner_id, period, &records))
    }

    /// Owners with at least one record.
    pub fn owners(&self) -> Result<Vec<String>, TrackerError> {
        let Ok(records) = self.records.lock() else {
            return Err(TrackerError::LockPoisoned);
        };
        let mut owners: Vec<String> = records.iter().map(|r| r.owner_id.clone()).collect();
        owners.sort_unstable();
        owners.dedup();
        Ok(owners)
    }

    /// Drop records older than `cutoff`. Returns the count removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackerError> {
        let Ok(mut records) = self.records.lock() else {
            return Err(TrackerError::LockPoisoned);
        };
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = before.saturating_sub(records.len());
        if removed > 0 {
            tracing::info!(removed, %cutoff, "Old usage records pruned");
        }
        Ok(removed)
    }
}

/// Start of the trailing `period` window ending at `now`.
pub fn window_start(period: StatsPeriod, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    period
        .window()
        .map(|w| now.checked_sub_signed(w).unwrap_or(DateTime::<Utc>::MIN_UTC))
}
