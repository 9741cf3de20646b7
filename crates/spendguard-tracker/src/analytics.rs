//! Usage analytics: breakdowns, trend, and subscription comparison.
//!
//! The trend compares a window's spend against the window of the same
//! length immediately before it. Changes within 10% either way are
//! reported as stable. [`StatsPeriod::All`] has no preceding window and is
//! always stable.
//!
//! The subscription comparison projects the window's spend to a 30-day
//! month and prices it against pay-per-use and every configured flat plan.

use std::collections::BTreeMap;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::math::percent_of;
use spendguard_types::{ModelTier, RequestMetrics, StatsPeriod, TrendDirection};

use crate::error::TrackerError;
use crate::tracker::{CostTracker, UserStats, task_label, window_start};

/// Upper edge of the stable band, in percent.
const TREND_BAND_UPPER: Decimal = Decimal::TEN;

/// Lower edge of the stable band, in percent.
const TREND_BAND_LOWER: Decimal = Decimal::from_parts(10, 0, 0, true, 0);

/// Name used for the pay-per-use option in comparisons.
pub const PAY_PER_USE: &str = "pay-per-use";

/// A flat-rate plan to compare against pay-per-use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTier {
    /// Plan name.
    pub name: String,
    /// Monthly price.
    pub monthly_price: Decimal,
    /// Pay-per-use value the plan covers each month. Usage beyond it is
    /// billed at pay-per-use rates. `None` means unlimited.
    #[serde(default)]
    pub covers_up_to: Option<Decimal>,
}

impl SubscriptionTier {
    /// Monthly cost of this plan for `pay_per_use` worth of usage.
    pub fn effective_cost(&self, pay_per_use: Decimal) -> Decimal {
        let overflow = self
            .covers_up_to
            .map_or(Decimal::ZERO, |cap| pay_per_use.saturating_sub(cap).max(Decimal::ZERO));
        self.monthly_price.saturating_add(overflow)
    }
}

/// Spend grouped by model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelBreakdown {
    /// Model id as recorded.
    pub model: String,
    /// Price tier of the model.
    pub tier: ModelTier,
    /// Requests on this model.
    pub requests: u64,
    /// Billed tokens on this model.
    pub tokens: u64,
    /// Spend on this model.
    pub cost: Decimal,
    /// Share of the window's total spend.
    pub percent_of_cost: Decimal,
    /// Spend per request.
    pub average_cost: Decimal,
}

/// Spend grouped by task label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskBreakdown {
    /// Task label (`unknown` when unlabeled).
    pub task_type: String,
    /// Requests with this label.
    pub requests: u64,
    /// Spend on this label.
    pub cost: Decimal,
    /// Share of the window's total spend.
    pub percent_of_cost: Decimal,
    /// Spend per request.
    pub average_cost: Decimal,
}

/// Spend direction relative to the preceding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trend {
    /// Direction after applying the stable band.
    pub direction: TrendDirection,
    /// Spend in the current window.
    pub current_cost: Decimal,
    /// Spend in the preceding window, if there is one.
    pub previous_cost: Option<Decimal>,
    /// Percentage change, when the previous window had spend.
    pub change_percent: Option<Decimal>,
}

impl Trend {
    /// Classify `current` against `previous`.
    pub fn between(current: Decimal, previous: Option<Decimal>) -> Self {
        let Some(previous) = previous else {
            return Self {
                direction: TrendDirection::Stable,
                current_cost: current,
                previous_cost: None,
                change_percent: None,
            };
        };
        if previous.is_zero() {
            let direction = if current > Decimal::ZERO {
                TrendDirection::Increasing
            } else {
                TrendDirection::Stable
            };
            return Self {
                direction,
                current_cost: current,
                previous_cost: Some(previous),
                change_percent: None,
            };
        }
        let change = percent_of(current.saturating_sub(previous), previous);
        let direction = if change > TREND_BAND_UPPER {
            TrendDirection::Increasing
        } else if change < TREND_BAND_LOWER {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };
        Self {
            direction,
            current_cost: current,
            previous_cost: Some(previous),
            change_percent: Some(change.round_dp(2)),
        }
    }
}

/// One priced option in a subscription comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionOption {
    /// Plan name, or [`PAY_PER_USE`].
    pub name: String,
    /// Projected monthly cost under this option.
    pub monthly_cost: Decimal,
}

/// Pay-per-use versus flat plans for the projected month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionComparison {
    /// Window spend scaled to 30 days.
    pub projected_monthly_spend: Decimal,
    /// Every option, pay-per-use first.
    pub options: Vec<SubscriptionOption>,
    /// The cheapest option's name.
    pub cheapest: String,
    /// Pay-per-use cost minus the cheapest option's cost.
    pub potential_savings: Decimal,
    /// Whether switching to a plan would save money.
    pub recommended: bool,
}

impl SubscriptionComparison {
    /// Price `projected` under pay-per-use and every tier.
    pub fn compare(projected: Decimal, tiers: &[SubscriptionTier]) -> Self {
        let mut options = vec![SubscriptionOption {
            name: PAY_PER_USE.to_owned(),
            monthly_cost: projected,
        }];
        options.extend(tiers.iter().map(|t| SubscriptionOption {
            name: t.name.clone(),
            monthly_cost: t.effective_cost(projected),
        }));

        // First of equal minima wins, so pay-per-use takes a draw.
        let (cheapest, cheapest_cost) = options
            .iter()
            .min_by_key(|o| o.monthly_cost)
            .map_or_else(
                || (PAY_PER_USE.to_owned(), projected),
                |o| (o.name.clone(), o.monthly_cost),
            );
        let potential_savings = projected.saturating_sub(cheapest_cost).max(Decimal::ZERO);

        Self {
            projected_monthly_spend: projected,
            recommended: cheapest != PAY_PER_USE && potential_savings > Decimal::ZERO,
            options,
            cheapest,
            potential_savings,
        }
    }

    /// The recommended plan, if any.
    pub fn recommended_tier<'a>(&self, tiers: &'a [SubscriptionTier]) -> Option<&'a SubscriptionTier> {
        if !self.recommended {
            return None;
        }
        tiers.iter().find(|t| t.name == self.cheapest)
    }
}

/// Full analytics report for one owner and window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    /// Aggregate stats for the window.
    pub summary: UserStats,
    /// Spend by model, most expensive first.
    pub by_model: Vec<ModelBreakdown>,
    /// Spend by task label, most expensive first.
    pub by_task: Vec<TaskBreakdown>,
    /// Spend direction against the preceding window.
    pub trend: Trend,
    /// Flat plan comparison for the projected month.
    pub subscription: SubscriptionComparison,
}

#[derive(Default)]
struct Bucket {
    tier: Option<ModelTier>,
    requests: u64,
    tokens: u64,
    cost: Decimal,
}

fn average(cost: Decimal, requests: u64) -> Decimal {
    cost.checked_div(Decimal::from(requests))
        .map_or(Decimal::ZERO, |a| a.round_dp(6))
}

fn bucket_by<'a, F>(records: &'a [RequestMetrics], key: F) -> BTreeMap<&'a str, Bucket>
where
    F: Fn(&'a RequestMetrics) -> &'a str,
{
    let mut buckets: BTreeMap<&str, Bucket> = BTreeMap::new();
    for r in records {
        let bucket = buckets.entry(key(r)).or_default();
        bucket.tier = Some(r.model_tier);
        bucket.requests = bucket.requests.saturating_add(1);
        bucket.tokens = bucket.tokens.saturating_add(r.total_tokens());
        bucket.cost = bucket.cost.saturating_add(r.cost);
    }
    buckets
}

/// Group `records` by model.
pub fn model_breakdown(records: &[RequestMetrics], total: Decimal) -> Vec<ModelBreakdown> {
    let mut out: Vec<ModelBreakdown> = bucket_by(records, |r| r.model.as_str())
        .into_iter()
        .map(|(model, b)| ModelBreakdown {
            model: model.to_owned(),
            tier: b.tier.unwrap_or(ModelTier::Standard),
            requests: b.requests,
            tokens: b.tokens,
            cost: b.cost,
            percent_of_cost: percent_of(b.cost, total).round_dp(2),
            average_cost: average(b.cost, b.requests),
        })
        .collect();
    out.sort_by(|a, b| b.cost.cmp(&a.cost).then_with(|| a.model.cmp(&b.model)));
    out
}

/// Group `records` by task label.
pub fn task_breakdown(records: &[RequestMetrics], total: Decimal) -> Vec<TaskBreakdown> {
    let mut out: Vec<TaskBreakdown> = bucket_by(records, task_label)
        .into_iter()
        .map(|(task, b)| TaskBreakdown {
            task_type: task.to_owned(),
            requests: b.requests,
            cost: b.cost,
            percent_of_cost: percent_of(b.cost, total).round_dp(2),
            average_cost: average(b.cost, b.requests),
        })
        .collect();
    out.sort_by(|a, b| b.cost.cmp(&a.cost).then_with(|| a.task_type.cmp(&b.task_type)));
    out
}

/// Scale `cost` spent over `window` to a 30-day month.
pub fn project_monthly(cost: Decimal, window: Duration) -> Decimal {
    let month = Duration::days(30).num_seconds();
    let seconds = window.num_seconds();
    if seconds <= 0 {
        return cost;
    }
    cost.checked_mul(Decimal::from(month))
        .and_then(|c| c.checked_div(Decimal::from(seconds)))
        .map_or(cost, |c| c.round_dp(6))
}

impl CostTracker {
    /// Build the analytics report for `owner_id` over `period`.
    ///
    /// For [`StatsPeriod::All`] the subscription projection uses the last
    /// 30 days.
    pub fn analytics(
        &self,
        owner_id: &str,
        period: StatsPeriod,
        tiers: &[SubscriptionTier],
    ) -> Result<Analytics, TrackerError> {
        let records = self.records(owner_id, period)?;
        let summary = UserStats::from_records(owner_id, period, &records);
        let total = summary.total_cost;

        let now = self.clock().now();
        let previous = match (period.window(), window_start(period, now)) {
            (Some(_), Some(start)) => {
                let prev_start = window_start(period, start);
                let prev = self.records_between(owner_id, prev_start, start)?;
                Some(prev.iter().fold(Decimal::ZERO, |acc, r| acc.saturating_add(r.cost)))
            }
            _ => None,
        };

        let projected = match period.window() {
            Some(window) => project_monthly(total, window),
            None => self
                .records(owner_id, StatsPeriod::Month)?
                .iter()
                .fold(Decimal::ZERO, |acc, r| acc.saturating_add(r.cost)),
        };

        Ok(Analytics {
            by_model: model_breakdown(&records, total),
            by_task: task_breakdown(&records, total),
            trend: Trend::between(total, previous),
            subscription: SubscriptionComparison::compare(projected, tiers),
            summary,
        })
    }
}
