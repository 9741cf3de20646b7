//! Threshold tier evaluation with per-period deduplication.
//!
//! Tiers are 1-based positions in the ascending threshold list; tier 0
//! means "nothing crossed". For each period the tracker remembers the
//! highest tier already reported during the current period instance and
//! only reports a crossing above it.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::{AlertLevel, BudgetPeriod};

/// A newly crossed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// 1-based tier in the threshold list.
    pub tier: usize,
    /// The threshold fraction of that tier.
    pub threshold: Decimal,
    /// Severity derived from the tier's rank.
    pub level: AlertLevel,
}

/// Last-alerted tier per period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTracker {
    last_alerted: BTreeMap<BudgetPeriod, usize>,
}

impl ThresholdTracker {
    /// Empty tracker: nothing reported yet.
    pub const fn new() -> Self {
        Self {
            last_alerted: BTreeMap::new(),
        }
    }

    /// Tier last reported for `period` (0 if none).
    pub fn last_alerted(&self, period: BudgetPeriod) -> usize {
        self.last_alerted.get(&period).copied().unwrap_or(0)
    }

    /// Overwrite the marker for `period`.
    pub fn set(&mut self, period: BudgetPeriod, tier: usize) {
        if tier == 0 {
            self.last_alerted.remove(&period);
        } else {
            self.last_alerted.insert(period, tier);
        }
    }

    /// Forget the marker for `period`, as on rollover.
    pub fn reset(&mut self, period: BudgetPeriod) {
        self.last_alerted.remove(&period);
    }

    /// Compare `fraction_used` against `thresholds` and decide whether to
    /// report.
    ///
    /// Returns the highest crossed tier when it is above the marker, and
    /// moves the marker to it. If usage has fallen below the marker (a
    /// raised limit, say) the marker drops to the current tier so a later
    /// re-crossing is reported again.
    pub fn evaluate(
        &mut self,
        period: BudgetPeriod,
        fraction_used: Decimal,
        thresholds: &[Decimal],
    ) -> Option<Crossing> {
        let tier = crossed_tier(fraction_used, thresholds);
        let last = self.last_alerted(period);

        if tier <= last {
            if tier < last {
                self.set(period, tier);
            }
            return None;
        }

        self.set(period, tier);
        let threshold = thresholds.get(tier.checked_sub(1)?).copied()?;
        Some(Crossing {
            tier,
            threshold,
            level: level_for_tier(tier, thresholds.len()),
        })
    }
}

/// Highest 1-based tier whose threshold is at or below `fraction_used`.
pub fn crossed_tier(fraction_used: Decimal, thresholds: &[Decimal]) -> usize {
    thresholds
        .iter()
        .take_while(|t| **t <= fraction_used)
        .count()
}

/// Severity by rank: the highest tier is critical, the next one down is a
/// warning, everything lower is informational.
pub const fn level_for_tier(tier: usize, tier_count: usize) -> AlertLevel {
    if tier >= tier_count {
        AlertLevel::Critical
    } else if tier.saturating_add(1) == tier_count {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    }
}
