//! Multi-period budget enforcement.
//!
//! A [`BudgetManager`] tracks one owner's running spend over the daily,
//! weekly, and monthly windows. Every operation first rolls any period
//! whose window has ended, so totals never carry across a boundary.
//!
//! Denial is evaluated in a fixed order: per-request cap, then daily,
//! weekly, monthly. Threshold warnings are evaluated for every period
//! independently of the denial decision, against spend *before* the
//! proposed cost, and are deduplicated per period instance by the
//! [`ThresholdTracker`] held under the same lock.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::{BudgetPeriod, BudgetPeriodStatus, BudgetWarning, Clock};

use crate::config::{BudgetConfig, BudgetConfigUpdate};
use crate::error::BudgetError;
use crate::period::PeriodWindow;
use crate::threshold::ThresholdTracker;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

// ---------------------------------------------------------------------------
// Public results
// ---------------------------------------------------------------------------

/// Which limit denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetLimit {
    /// The single-request cap.
    PerRequest,
    /// A period limit.
    Period {
        /// The period whose limit would be exceeded.
        period: BudgetPeriod,
    },
}

/// Snapshot of every period plus the per-request cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Current UTC day.
    pub daily: BudgetPeriodStatus,
    /// Current ISO week.
    pub weekly: BudgetPeriodStatus,
    /// Current calendar month.
    pub monthly: BudgetPeriodStatus,
    /// Largest cost a single request may have.
    pub per_request_limit: Decimal,
}

impl BudgetStatus {
    /// The snapshot for `period`.
    pub const fn period(&self, period: BudgetPeriod) -> &BudgetPeriodStatus {
        match period {
            BudgetPeriod::Daily => &self.daily,
            BudgetPeriod::Weekly => &self.weekly,
            BudgetPeriod::Monthly => &self.monthly,
        }
    }
}

/// Outcome of [`BudgetManager::check_budget`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCheck {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Human-readable denial reason.
    pub reason: Option<String>,
    /// The limit that caused the denial.
    pub exceeded: Option<BudgetLimit>,
    /// State before the proposed cost.
    pub status: BudgetStatus,
    /// Newly crossed thresholds, at most one per period.
    pub warnings: Vec<BudgetWarning>,
}

/// Persisted state of one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    /// Which period.
    pub period: BudgetPeriod,
    /// Start of the period instance the spend belongs to.
    pub period_start: DateTime<Utc>,
    /// Spend in that instance.
    pub spent: Decimal,
    /// Highest threshold tier already reported (0 for none).
    pub last_alerted_tier: usize,
}

/// Everything needed to restore a manager after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// One entry per period.
    pub periods: Vec<PeriodSnapshot>,
    /// When the snapshot was taken.
    pub exported_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct PeriodState {
    window: PeriodWindow,
    spent: Decimal,
}

#[derive(Debug)]
struct Ledger {
    daily: PeriodState,
    weekly: PeriodState,
    monthly: PeriodState,
}

impl Ledger {
    fn starting_at(now: DateTime<Utc>) -> Self {
        let fresh = |period| PeriodState {
            window: PeriodWindow::containing(period, now),
            spent: Decimal::ZERO,
        };
        Self {
            daily: fresh(BudgetPeriod::Daily),
            weekly: fresh(BudgetPeriod::Weekly),
            monthly: fresh(BudgetPeriod::Monthly),
        }
    }

    const fn get(&self, period: BudgetPeriod) -> &PeriodState {
        match period {
            BudgetPeriod::Daily => &self.daily,
            BudgetPeriod::Weekly => &self.weekly,
            BudgetPeriod::Monthly => &self.monthly,
        }
    }

    const fn get_mut(&mut self, period: BudgetPeriod) -> &mut PeriodState {
        match period {
            BudgetPeriod::Daily => &mut self.daily,
            BudgetPeriod::Weekly => &mut self.weekly,
            BudgetPeriod::Monthly => &mut self.monthly,
        }
    }
}

#[derive(Debug)]
struct BudgetState {
    config: BudgetConfig,
    ledger: Ledger,
    thresholds: ThresholdTracker,
}

impl BudgetState {
    /// Reset every period whose window no longer contains `now`.
    fn roll(&mut self, now: DateTime<Utc>) {
        for period in BudgetPeriod::ALL {
            let current = PeriodWindow::containing(period, now);
            let state = self.ledger.get_mut(period);
            if state.window != current {
                tracing::info!(
                    %period,
                    previous_spent = %state.spent,
                    new_start = %current.start,
                    "Budget period rolled over"
                );
                state.window = current;
                state.spent = Decimal::ZERO;
                self.thresholds.reset(period);
            }
        }
    }

    fn fraction_used(&self, period: BudgetPeriod) -> Decimal {
        self.ledger
            .get(period)
            .spent
            .checked_div(self.config.limit(period))
            .unwrap_or(Decimal::ZERO)
    }

    fn period_status(&self, period: BudgetPeriod, now: DateTime<Utc>) -> BudgetPeriodStatus {
        let state = self.ledger.get(period);
        let limit = self.config.limit(period);
        let projected_spend = project(state.spent, state.window, now);
        BudgetPeriodStatus {
            period,
            limit,
            spent: state.spent,
            remaining: limit.saturating_sub(state.spent).max(Decimal::ZERO),
            percent_used: self.fraction_used(period).saturating_mul(HUNDRED),
            period_start: state.window.start,
            period_end: state.window.end,
            projected_spend,
            projected_overage: projected_spend.map(|p| p.saturating_sub(limit).max(Decimal::ZERO)),
        }
    }

    fn status(&self, now: DateTime<Utc>) -> BudgetStatus {
        BudgetStatus {
            daily: self.period_status(BudgetPeriod::Daily, now),
            weekly: self.period_status(BudgetPeriod::Weekly, now),
            monthly: self.period_status(BudgetPeriod::Monthly, now),
            per_request_limit: self.config.per_request,
        }
    }

    fn warnings(&mut self) -> Vec<BudgetWarning> {
        let mut warnings = Vec::new();
        for period in BudgetPeriod::ALL {
            let fraction = self.fraction_used(period);
            let Some(crossing) =
                self.thresholds
                    .evaluate(period, fraction, &self.config.alert_thresholds)
            else {
                continue;
            };
            let percent_used = fraction.saturating_mul(HUNDRED);
            let message = format!(
                "{} budget at {}% of {} (threshold {}%)",
                capitalize(period.as_str()),
                percent_used.round_dp(1).normalize(),
                self.config.limit(period),
                crossing.threshold.saturating_mul(HUNDRED).normalize(),
            );
            warnings.push(BudgetWarning {
                level: crossing.level,
                period,
                message,
                percent_used,
                threshold: crossing.threshold,
            });
        }
        warnings
    }

    fn denial(&self, proposed: Decimal) -> Option<(BudgetLimit, String)> {
        if proposed > self.config.per_request {
            return Some((
                BudgetLimit::PerRequest,
                format!(
                    "Request cost {proposed} exceeds the per-request limit of {}",
                    self.config.per_request
                ),
            ));
        }
        for period in BudgetPeriod::ALL {
            let spent = self.ledger.get(period).spent;
            let limit = self.config.limit(period);
            if spent.saturating_add(proposed) > limit {
                return Some((
                    BudgetLimit::Period { period },
                    format!(
                        "{} budget exceeded: {spent} of {limit} spent, request would add {proposed}",
                        capitalize(period.as_str())
                    ),
                ));
            }
        }
        None
    }
}

/// Extrapolate `spent` linearly to the end of `window`.
fn project(spent: Decimal, window: PeriodWindow, now: DateTime<Utc>) -> Option<Decimal> {
    let elapsed = now.signed_duration_since(window.start).num_milliseconds();
    let total = window.end.signed_duration_since(window.start).num_milliseconds();
    if elapsed <= 0 {
        return None;
    }
    spent
        .checked_mul(Decimal::from(total))?
        .checked_div(Decimal::from(elapsed))
        .map(|p| p.round_dp(6))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// One owner's budget: running spend, limits, and alert dedup state.
#[derive(Debug)]
pub struct BudgetManager {
    clock: Clock,
    state: Mutex<BudgetState>,
}

impl BudgetManager {
    /// Create a manager with zero spend. Fails if `config` is invalid.
    pub fn new(config: BudgetConfig, clock: Clock) -> Result<Self, BudgetError> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            clock,
            state: Mutex::new(BudgetState {
                config,
                ledger: Ledger::starting_at(now),
                thresholds: ThresholdTracker::new(),
            }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BudgetState>, BudgetError> {
        self.state.lock().map_err(|_poisoned| BudgetError::LockPoisoned)
    }

    /// Decide whether a request costing `proposed` may proceed.
    ///
    /// Never mutates spend. Does advance the warning dedup markers, so a
    /// warning returned here will not be returned again this period.
    pub fn check_budget(&self, proposed: Decimal) -> Result<BudgetCheck, BudgetError> {
        if proposed.is_sign_negative() {
            return Err(BudgetError::InvalidAmount(format!(
                "proposed cost must not be negative, got {proposed}"
            )));
        }
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.roll(now);

        let status = state.status(now);
        let warnings = state.warnings();
        let denial = state.denial(proposed);
        drop(state);

        for warning in &warnings {
            tracing::debug!(
                period = %warning.period,
                level = warning.level.as_str(),
                percent_used = %warning.percent_used,
                "Budget threshold crossed"
            );
        }

        let check = match denial {
            Some((limit, reason)) => {
                tracing::warn!(%proposed, ?limit, %reason, "Request denied by budget");
                BudgetCheck {
                    allowed: false,
                    reason: Some(reason),
                    exceeded: Some(limit),
                    status,
                    warnings,
                }
            }
            None => BudgetCheck {
                allowed: true,
                reason: None,
                exceeded: None,
                status,
                warnings,
            },
        };
        Ok(check)
    }

    /// Add `amount` to every period's running total.
    pub fn record_spending(&self, amount: Decimal) -> Result<BudgetStatus, BudgetError> {
        if amount.is_sign_negative() {
            return Err(BudgetError::InvalidAmount(format!(
                "spend must not be negative, got {amount}"
            )));
        }
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.roll(now);
        for period in BudgetPeriod::ALL {
            let entry = state.ledger.get_mut(period);
            entry.spent = entry.spent.saturating_add(amount);
        }
        tracing::debug!(%amount, daily_spent = %state.ledger.daily.spent, "Spend recorded");
        Ok(state.status(now))
    }

    /// Current snapshot of every period.
    pub fn status(&self) -> Result<BudgetStatus, BudgetError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.roll(now);
        Ok(state.status(now))
    }

    /// Active configuration.
    pub fn config(&self) -> Result<BudgetConfig, BudgetError> {
        Ok(self.lock()?.config.clone())
    }

    /// Validate and apply a partial update. Spend is preserved.
    pub fn update_config(&self, update: &BudgetConfigUpdate) -> Result<BudgetConfig, BudgetError> {
        let mut state = self.lock()?;
        let next = state.config.merged(update)?;
        state.config = next.clone();
        tracing::info!(
            daily = %next.daily,
            weekly = %next.weekly,
            monthly = %next.monthly,
            per_request = %next.per_request,
            "Budget configuration updated"
        );
        Ok(next)
    }

    /// Serialize totals, period anchors, and dedup markers.
    pub fn export_state(&self) -> Result<BudgetSnapshot, BudgetError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.roll(now);
        let periods = BudgetPeriod::ALL
            .into_iter()
            .map(|period| {
                let entry = state.ledger.get(period);
                PeriodSnapshot {
                    period,
                    period_start: entry.window.start,
                    spent: entry.spent,
                    last_alerted_tier: state.thresholds.last_alerted(period),
                }
            })
            .collect();
        Ok(BudgetSnapshot {
            periods,
            exported_at: now,
        })
    }

    /// Restore state from [`export_state`](Self::export_state).
    ///
    /// Periods whose anchor is no longer current are rolled immediately,
    /// so a snapshot from yesterday restores only weekly and monthly
    /// spend.
    pub fn import_state(&self, snapshot: &BudgetSnapshot) -> Result<(), BudgetError> {
        for entry in &snapshot.periods {
            if entry.spent.is_sign_negative() {
                return Err(BudgetError::InvalidState(format!(
                    "{} spend must not be negative",
                    entry.period
                )));
            }
        }

        let now = self.clock.now();
        let mut state = self.lock()?;
        let tier_count = state.config.alert_thresholds.len();
        for entry in &snapshot.periods {
            let target = state.ledger.get_mut(entry.period);
            target.window = PeriodWindow::containing(entry.period, entry.period_start);
            target.spent = entry.spent;
            state
                .thresholds
                .set(entry.period, entry.last_alerted_tier.min(tier_count));
        }
        state.roll(now);
        tracing::info!(periods = snapshot.periods.len(), "Budget state imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use spendguard_types::AlertLevel;

    use super::*;

    /// Wednesday 2026-03-11 00:00 UTC.
    fn clock() -> Clock {
        Clock::manual(
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    fn config(daily: Decimal, weekly: Decimal, monthly: Decimal, per_request: Decimal) -> BudgetConfig {
        BudgetConfig {
            daily,
            weekly,
            monthly,
            per_request,
            ..BudgetConfig::default()
        }
    }

    fn manager(config: BudgetConfig, clock: &Clock) -> BudgetManager {
        match BudgetManager::new(config, clock.clone()) {
            Ok(m) => m,
            Err(e) => panic!("valid config rejected: {e}"),
        }
    }

    #[test]
    fn near_limit_raises_single_critical_warning() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        budget.record_spending(dec!(9.6)).ok();

        let Ok(check) = budget.check_budget(dec!(0.01)) else {
            panic!("check failed");
        };
        assert!(check.allowed);
        assert_eq!(check.warnings.len(), 1);
        let warning = check.warnings.first();
        assert_eq!(warning.map(|w| w.level), Some(AlertLevel::Critical));
        assert_eq!(warning.map(|w| w.period), Some(BudgetPeriod::Daily));
        assert_eq!(warning.map(|w| w.percent_used), Some(dec!(96)));
        assert_eq!(warning.map(|w| w.threshold), Some(dec!(0.95)));
    }

    #[test]
    fn warning_is_not_repeated_within_period() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        budget.record_spending(dec!(9.6)).ok();

        assert_eq!(budget.check_budget(dec!(0.01)).map(|c| c.warnings.len()).ok(), Some(1));
        assert_eq!(budget.check_budget(dec!(0.01)).map(|c| c.warnings.len()).ok(), Some(0));
    }

    #[test]
    fn per_request_cap_is_checked_first() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);

        let Ok(check) = budget.check_budget(dec!(1.5)) else {
            panic!("check failed");
        };
        assert!(!check.allowed);
        assert_eq!(check.exceeded, Some(BudgetLimit::PerRequest));
        assert!(check.reason.is_some_and(|r| r.contains("per-request limit")));
    }

    #[test]
    fn denial_order_is_daily_weekly_monthly() {
        let clock = clock();

        let all_tight = manager(config(dec!(5), dec!(5), dec!(5), dec!(2)), &clock);
        all_tight.record_spending(dec!(4.5)).ok();
        let check = all_tight.check_budget(dec!(1)).ok();
        assert_eq!(
            check.and_then(|c| c.exceeded),
            Some(BudgetLimit::Period { period: BudgetPeriod::Daily })
        );

        let weekly_tight = manager(config(dec!(100), dec!(5), dec!(5), dec!(2)), &clock);
        weekly_tight.record_spending(dec!(4.5)).ok();
        let check = weekly_tight.check_budget(dec!(1)).ok();
        assert_eq!(
            check.and_then(|c| c.exceeded),
            Some(BudgetLimit::Period { period: BudgetPeriod::Weekly })
        );

        let monthly_tight = manager(config(dec!(100), dec!(100), dec!(5), dec!(2)), &clock);
        monthly_tight.record_spending(dec!(4.5)).ok();
        let check = monthly_tight.check_budget(dec!(1)).ok();
        assert_eq!(
            check.and_then(|c| c.exceeded),
            Some(BudgetLimit::Period { period: BudgetPeriod::Monthly })
        );
    }

    #[test]
    fn reaching_the_limit_exactly_is_allowed() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        budget.record_spending(dec!(9)).ok();
        assert_eq!(budget.check_budget(dec!(1)).map(|c| c.allowed).ok(), Some(true));
        assert_eq!(budget.check_budget(dec!(1.01)).map(|c| c.allowed).ok(), Some(false));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let clock = clock();
        let budget = manager(BudgetConfig::default(), &clock);
        assert!(matches!(
            budget.record_spending(dec!(-1)),
            Err(BudgetError::InvalidAmount(_))
        ));
        assert!(budget.check_budget(dec!(-0.5)).is_err());
    }

    #[test]
    fn daily_rollover_resets_daily_only() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        budget.record_spending(dec!(9.6)).ok();
        budget.check_budget(dec!(0)).ok();

        clock.advance(Duration::days(1));
        let Ok(status) = budget.status() else {
            panic!("status failed");
        };
        assert_eq!(status.daily.spent, Decimal::ZERO);
        assert_eq!(status.weekly.spent, dec!(9.6));

        budget.record_spending(dec!(9.6)).ok();
        let warnings = budget.check_budget(dec!(0)).map(|c| c.warnings).ok();
        assert_eq!(
            warnings.and_then(|w| w.first().map(|w| w.period)),
            Some(BudgetPeriod::Daily)
        );
    }

    #[test]
    fn weekly_rollover_happens_on_monday() {
        let clock = clock();
        let budget = manager(BudgetConfig::default(), &clock);
        budget.record_spending(dec!(3)).ok();

        // Wednesday -> Sunday: same ISO week.
        clock.advance(Duration::days(4));
        assert_eq!(budget.status().map(|s| s.weekly.spent).ok(), Some(dec!(3)));

        // Sunday -> Monday.
        clock.advance(Duration::days(1));
        assert_eq!(budget.status().map(|s| s.weekly.spent).ok(), Some(Decimal::ZERO));
        assert_eq!(budget.status().map(|s| s.monthly.spent).ok(), Some(dec!(3)));
    }

    #[test]
    fn projection_needs_elapsed_time() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        budget.record_spending(dec!(5)).ok();
        assert_eq!(budget.status().map(|s| s.daily.projected_spend).ok(), Some(None));

        clock.advance(Duration::hours(12));
        let Ok(status) = budget.status() else {
            panic!("status failed");
        };
        assert_eq!(status.daily.projected_spend, Some(dec!(10)));
        assert_eq!(status.daily.projected_overage, Some(Decimal::ZERO));
        assert_eq!(status.daily.remaining, dec!(5));
    }

    #[test]
    fn overspend_clamps_remaining_only() {
        let clock = clock();
        let budget = manager(config(dec!(10), dec!(50), dec!(150), dec!(20)), &clock);
        budget.record_spending(dec!(12)).ok();
        let Ok(status) = budget.status() else {
            panic!("status failed");
        };
        assert_eq!(status.daily.spent, dec!(12));
        assert_eq!(status.daily.remaining, Decimal::ZERO);
        assert_eq!(status.daily.percent_used, dec!(120));
    }

    #[test]
    fn update_config_keeps_spend() {
        let clock = clock();
        let budget = manager(BudgetConfig::default(), &clock);
        budget.record_spending(dec!(4)).ok();
        budget
            .update_config(&BudgetConfigUpdate::period(BudgetPeriod::Daily, dec!(20)))
            .ok();
        let Ok(status) = budget.status() else {
            panic!("status failed");
        };
        assert_eq!(status.daily.limit, dec!(20));
        assert_eq!(status.daily.spent, dec!(4));
    }

    #[test]
    fn invalid_update_is_rejected_whole() {
        let clock = clock();
        let budget = manager(BudgetConfig::default(), &clock);
        let update = BudgetConfigUpdate {
            daily: Some(dec!(99)),
            alert_thresholds: Some(vec![dec!(0.9), dec!(0.1)]),
            ..BudgetConfigUpdate::default()
        };
        assert!(budget.update_config(&update).is_err());
        assert_eq!(budget.config().map(|c| c.daily).ok(), Some(dec!(10)));
    }

    #[test]
    fn export_import_reproduces_status() {
        let clock = clock();
        let original = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        clock.advance(Duration::hours(6));
        original.record_spending(dec!(9.6)).ok();
        original.check_budget(dec!(0.01)).ok();

        let Ok(snapshot) = original.export_state() else {
            panic!("export failed");
        };
        let restored = manager(config(dec!(10), dec!(50), dec!(150), dec!(1)), &clock);
        assert!(restored.import_state(&snapshot).is_ok());

        assert_eq!(restored.status().ok(), original.status().ok());
        // The dedup marker survived: no second critical warning.
        assert_eq!(restored.check_budget(dec!(0.01)).map(|c| c.warnings.len()).ok(), Some(0));
    }

    #[test]
    fn stale_snapshot_rolls_on_import() {
        let clock = clock();
        let original = manager(BudgetConfig::default(), &clock);
        original.record_spending(dec!(2)).ok();
        let Ok(snapshot) = original.export_state() else {
            panic!("export failed");
        };

        clock.advance(Duration::days(1));
        let restored = manager(BudgetConfig::default(), &clock);
        restored.import_state(&snapshot).ok();
        let Ok(status) = restored.status() else {
            panic!("status failed");
        };
        assert_eq!(status.daily.spent, Decimal::ZERO);
        assert_eq!(status.weekly.spent, dec!(2));
    }

    #[test]
    fn snapshot_serializes() {
        let clock = clock();
        let budget = manager(BudgetConfig::default(), &clock);
        budget.record_spending(dec!(1.25)).ok();
        let snapshot = budget.export_state().ok();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        let back: Option<BudgetSnapshot> = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(back, snapshot);
    }
}
