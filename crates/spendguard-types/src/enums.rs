//! Enumeration types shared across the Spendguard workspace.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Budget periods
// ---------------------------------------------------------------------------

/// A wall-clock-aligned accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum BudgetPeriod {
    /// Midnight UTC to midnight UTC.
    Daily,
    /// ISO week, Monday 00:00 UTC onwards.
    Weekly,
    /// Calendar month, first day 00:00 UTC onwards.
    Monthly,
}

impl BudgetPeriod {
    /// All periods in evaluation order (shortest first).
    pub const ALL: [Self; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Lowercase name used in messages and the wire format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            other => Err(format!(
                "unknown budget period '{other}' (expected daily, weekly, or monthly)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity of a budget warning or cost alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum AlertLevel {
    /// Informational -- spend is notable but not concerning.
    Info,
    /// Warning -- spend is approaching a limit.
    Warning,
    /// Critical -- a limit is nearly or fully consumed.
    Critical,
}

impl AlertLevel {
    /// Lowercase name used in messages and the wire format.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown alert level '{other}'")),
        }
    }
}

/// Category of a cost alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AlertType {
    /// A period crossed one of the configured alert thresholds.
    BudgetWarning,
    /// A request was denied by the budget check.
    BudgetExceeded,
    /// A single request is estimated to be expensive.
    HighCostRequest,
    /// A flat subscription tier would be cheaper than pay-per-use.
    SubscriptionRecommended,
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "budget_warning" => Ok(Self::BudgetWarning),
            "budget_exceeded" => Ok(Self::BudgetExceeded),
            "high_cost_request" => Ok(Self::HighCostRequest),
            "subscription_recommended" => Ok(Self::SubscriptionRecommended),
            other => Err(format!("unknown alert type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Which cache tier produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum MatchType {
    /// Content-hash match on system prompt, prompt, and model.
    Exact,
    /// Embedding similarity above the configured threshold.
    Semantic,
}

// ---------------------------------------------------------------------------
// Models and tasks
// ---------------------------------------------------------------------------

/// Coarse price tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ModelTier {
    /// Small, fast, cheap models.
    Economy,
    /// General-purpose mid-priced models.
    Standard,
    /// Frontier models with the highest rates.
    Premium,
}

/// Complexity assigned by the external classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Complexity {
    /// Short, routine prompt.
    Low,
    /// Typical prompt.
    Medium,
    /// Long or reasoning-heavy prompt.
    High,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Aggregation window for usage statistics.
///
/// `Day`, `Week`, and `Month` are trailing windows of 1, 7, and 30 days
/// ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum StatsPeriod {
    /// Last 24 hours.
    Day,
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
    /// Every recorded request.
    All,
}

impl StatsPeriod {
    /// Window length, or `None` for [`StatsPeriod::All`].
    pub fn window(self) -> Option<chrono::Duration> {
        match self {
            Self::Day => Some(chrono::Duration::days(1)),
            Self::Week => Some(chrono::Duration::days(7)),
            Self::Month => Some(chrono::Duration::days(30)),
            Self::All => None,
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown stats period '{other}' (expected day, week, month, or all)"
            )),
        }
    }
}

/// Direction of spend compared to the preceding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum TrendDirection {
    /// Spend grew by more than the stability band.
    Increasing,
    /// Spend shrank by more than the stability band.
    Decreasing,
    /// Spend stayed within the stability band.
    Stable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_period_parses_aliases() {
        assert_eq!("Daily".parse::<BudgetPeriod>(), Ok(BudgetPeriod::Daily));
        assert_eq!(" week ".parse::<BudgetPeriod>(), Ok(BudgetPeriod::Weekly));
        assert_eq!("month".parse::<BudgetPeriod>(), Ok(BudgetPeriod::Monthly));
        assert!("yearly".parse::<BudgetPeriod>().is_err());
    }

    #[test]
    fn alert_level_orders_by_severity() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
    }

    #[test]
    fn alert_type_wire_names() {
        let json = serde_json::to_string(&AlertType::HighCostRequest).unwrap_or_default();
        assert_eq!(json, "\"high_cost_request\"");
        assert_eq!(
            "subscription_recommended".parse::<AlertType>(),
            Ok(AlertType::SubscriptionRecommended)
        );
    }

    #[test]
    fn all_period_has_no_window() {
        assert!(StatsPeriod::All.window().is_none());
        assert_eq!(StatsPeriod::Week.window(), Some(chrono::Duration::days(7)));
    }
}
