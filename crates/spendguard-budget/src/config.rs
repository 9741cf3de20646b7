//! Budget and alert configuration.
//!
//! Mirrors the `budget:` and `alerts:` sections of `spendguard.yaml`.
//! Limits are in the account's currency and stored as [`Decimal`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendguard_types::BudgetPeriod;

use crate::error::BudgetError;

/// Spend limits per period and per request, plus alert thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Limit for one UTC day.
    #[serde(default = "default_daily")]
    pub daily: Decimal,

    /// Limit for one ISO week.
    #[serde(default = "default_weekly")]
    pub weekly: Decimal,

    /// Limit for one calendar month.
    #[serde(default = "default_monthly")]
    pub monthly: Decimal,

    /// Largest cost a single request may have.
    #[serde(default = "default_per_request")]
    pub per_request: Decimal,

    /// Ascending fractions of a period limit that raise warnings.
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<Decimal>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            per_request: default_per_request(),
            alert_thresholds: default_alert_thresholds(),
        }
    }
}

impl BudgetConfig {
    /// Limit configured for `period`.
    pub const fn limit(&self, period: BudgetPeriod) -> Decimal {
        match period {
            BudgetPeriod::Daily => self.daily,
            BudgetPeriod::Weekly => self.weekly,
            BudgetPeriod::Monthly => self.monthly,
        }
    }

    /// Set the limit for `period`.
    pub const fn set_limit(&mut self, period: BudgetPeriod, amount: Decimal) {
        match period {
            BudgetPeriod::Daily => self.daily = amount,
            BudgetPeriod::Weekly => self.weekly = amount,
            BudgetPeriod::Monthly => self.monthly = amount,
        }
    }

    /// Reject non-positive limits and malformed threshold lists.
    pub fn validate(&self) -> Result<(), BudgetError> {
        for period in BudgetPeriod::ALL {
            let limit = self.limit(period);
            if limit <= Decimal::ZERO {
                return Err(BudgetError::InvalidConfig(format!(
                    "{period} limit must be positive, got {limit}"
                )));
            }
        }
        if self.per_request <= Decimal::ZERO {
            return Err(BudgetError::InvalidConfig(format!(
                "per-request limit must be positive, got {}",
                self.per_request
            )));
        }

        let mut previous = Decimal::ZERO;
        for threshold in &self.alert_thresholds {
            if *threshold <= Decimal::ZERO || *threshold > Decimal::ONE {
                return Err(BudgetError::InvalidConfig(format!(
                    "alert threshold {threshold} must be within (0, 1]"
                )));
            }
            if *threshold <= previous {
                return Err(BudgetError::InvalidConfig(
                    "alert thresholds must be strictly ascending".to_owned(),
                ));
            }
            previous = *threshold;
        }
        Ok(())
    }

    /// Apply `update` to a copy of this config and validate the result.
    ///
    /// `self` is untouched if validation fails.
    pub fn merged(&self, update: &BudgetConfigUpdate) -> Result<Self, BudgetError> {
        let mut next = self.clone();
        if let Some(v) = update.daily {
            next.daily = v;
        }
        if let Some(v) = update.weekly {
            next.weekly = v;
        }
        if let Some(v) = update.monthly {
            next.monthly = v;
        }
        if let Some(v) = update.per_request {
            next.per_request = v;
        }
        if let Some(v) = &update.alert_thresholds {
            next.alert_thresholds.clone_from(v);
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for [`BudgetConfig`]. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfigUpdate {
    /// New daily limit.
    #[serde(default)]
    pub daily: Option<Decimal>,
    /// New weekly limit.
    #[serde(default)]
    pub weekly: Option<Decimal>,
    /// New monthly limit.
    #[serde(default)]
    pub monthly: Option<Decimal>,
    /// New per-request limit.
    #[serde(default)]
    pub per_request: Option<Decimal>,
    /// Replacement threshold list.
    #[serde(default)]
    pub alert_thresholds: Option<Vec<Decimal>>,
}

impl BudgetConfigUpdate {
    /// An update that changes only the limit for `period`.
    pub fn period(period: BudgetPeriod, amount: Decimal) -> Self {
        let mut update = Self::default();
        match period {
            BudgetPeriod::Daily => update.daily = Some(amount),
            BudgetPeriod::Weekly => update.weekly = Some(amount),
            BudgetPeriod::Monthly => update.monthly = Some(amount),
        }
        update
    }
}

/// Alert retention and high-cost floors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Alerts kept in memory; oldest are dropped first.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// A single request costing at least this much raises a warning.
    #[serde(default = "default_high_cost_warning")]
    pub high_cost_warning: Decimal,

    /// A single request costing more than this raises a critical alert.
    #[serde(default = "default_high_cost_critical")]
    pub high_cost_critical: Decimal,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_alerts: default_max_alerts(),
            high_cost_warning: default_high_cost_warning(),
            high_cost_critical: default_high_cost_critical(),
        }
    }
}

impl AlertConfig {
    /// Reject a zero-capacity ring and inverted floors.
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_alerts == 0 {
            return Err(BudgetError::InvalidConfig(
                "alerts.max_alerts must be greater than zero".to_owned(),
            ));
        }
        if self.high_cost_warning <= Decimal::ZERO
            || self.high_cost_critical < self.high_cost_warning
        {
            return Err(BudgetError::InvalidConfig(
                "alerts.high_cost_critical must be at least high_cost_warning, both positive"
                    .to_owned(),
            ));
        }
        Ok(())
    }
}

const fn default_daily() -> Decimal {
    Decimal::from_parts(10, 0, 0, false, 0)
}

const fn default_weekly() -> Decimal {
    Decimal::from_parts(50, 0, 0, false, 0)
}

const fn default_monthly() -> Decimal {
    Decimal::from_parts(150, 0, 0, false, 0)
}

const fn default_per_request() -> Decimal {
    Decimal::ONE
}

fn default_alert_thresholds() -> Vec<Decimal> {
    vec![Decimal::new(5, 1), Decimal::new(8, 1), Decimal::new(95, 2)]
}

const fn default_max_alerts() -> usize {
    100
}

const fn default_high_cost_warning() -> Decimal {
    Decimal::ONE
}

const fn default_high_cost_critical() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 0)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(BudgetConfig::default().validate().is_ok());
        assert!(AlertConfig::default().validate().is_ok());
    }

    #[test]
    fn thresholds_must_ascend() {
        let config = BudgetConfig {
            alert_thresholds: vec![dec!(0.8), dec!(0.5)],
            ..BudgetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_above_one_is_rejected() {
        let config = BudgetConfig {
            alert_thresholds: vec![dec!(1.2)],
            ..BudgetConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_rejects_without_mutating() {
        let config = BudgetConfig::default();
        let update = BudgetConfigUpdate {
            daily: Some(dec!(25)),
            per_request: Some(dec!(-1)),
            ..BudgetConfigUpdate::default()
        };
        assert!(config.merged(&update).is_err());
        assert_eq!(config.daily, dec!(10));
    }

    #[test]
    fn merge_applies_only_given_fields() {
        let config = BudgetConfig::default();
        let merged = config
            .merged(&BudgetConfigUpdate::period(BudgetPeriod::Weekly, dec!(70)))
            .ok();
        assert_eq!(merged.as_ref().map(|c| c.weekly), Some(dec!(70)));
        assert_eq!(merged.map(|c| c.daily), Some(dec!(10)));
    }
}
