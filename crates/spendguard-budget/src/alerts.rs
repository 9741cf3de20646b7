//! Cost alerts: creation, fan-out, and a bounded history.
//!
//! Every emitted alert is appended to a ring buffer (oldest dropped first)
//! and then passed to each registered handler in registration order. A
//! handler that returns an error or panics is logged and skipped; it never
//! stops later handlers or the emitter.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use spendguard_types::{AlertId, AlertLevel, AlertType, BudgetWarning, Clock, CostAlert};

use crate::config::AlertConfig;
use crate::manager::{BudgetCheck, BudgetLimit};

/// Callback invoked for every emitted alert.
pub type AlertHandler = dyn Fn(&CostAlert) -> Result<(), String> + Send + Sync;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    list: Vec<(u64, Arc<AlertHandler>)>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("next_id", &self.next_id)
            .field("count", &self.list.len())
            .finish()
    }
}

/// Handle returned by [`AlertManager::register_handler`].
///
/// Dropping it leaves the handler registered; call
/// [`unregister`](Self::unregister) to remove it.
#[derive(Debug)]
pub struct HandlerRegistration {
    id: u64,
    handlers: Weak<Mutex<Handlers>>,
}

impl HandlerRegistration {
    /// Remove the handler. Returns `false` if it was already gone.
    pub fn unregister(self) -> bool {
        let Some(handlers) = self.handlers.upgrade() else {
            return false;
        };
        let Ok(mut handlers) = handlers.lock() else {
            return false;
        };
        let before = handlers.list.len();
        handlers.list.retain(|(id, _)| *id != self.id);
        handlers.list.len() < before
    }
}

/// Criteria for [`AlertManager::alerts`]. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    /// Only this alert type.
    #[serde(default, rename = "type")]
    pub alert_type: Option<AlertType>,
    /// Only this level.
    #[serde(default)]
    pub level: Option<AlertLevel>,
    /// Skip acknowledged alerts.
    #[serde(default)]
    pub unacknowledged_only: bool,
    /// Return at most this many.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AlertFilter {
    fn matches(&self, alert: &CostAlert) -> bool {
        self.alert_type.is_none_or(|t| t == alert.alert_type)
            && self.level.is_none_or(|l| l == alert.level)
            && !(self.unacknowledged_only && alert.acknowledged)
    }
}

/// Alert creation, fan-out, and history.
#[derive(Debug)]
pub struct AlertManager {
    config: AlertConfig,
    clock: Clock,
    history: Mutex<VecDeque<CostAlert>>,
    handlers: Arc<Mutex<Handlers>>,
}

impl AlertManager {
    /// Create a manager with no handlers and empty history.
    pub fn new(config: AlertConfig, clock: Clock) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(config.max_alerts)),
            config,
            clock,
            handlers: Arc::new(Mutex::new(Handlers::default())),
        }
    }

    /// Register `handler` to receive every future alert.
    pub fn register_handler<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(&CostAlert) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut id = 0;
        if let Ok(mut handlers) = self.handlers.lock() {
            id = handlers.next_id;
            handlers.next_id = handlers.next_id.saturating_add(1);
            handlers.list.push((id, Arc::new(handler)));
        }
        HandlerRegistration {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Build, store, and dispatch an alert. Returns the stored alert.
    pub fn emit(
        &self,
        alert_type: AlertType,
        level: AlertLevel,
        message: String,
        details: serde_json::Value,
    ) -> CostAlert {
        let alert = CostAlert {
            id: AlertId::new(),
            alert_type,
            level,
            message,
            details,
            created_at: self.clock.now(),
            acknowledged: false,
        };

        if let Ok(mut history) = self.history.lock() {
            history.push_back(alert.clone());
            while history.len() > self.config.max_alerts {
                history.pop_front();
            }
        }

        tracing::info!(
            alert_id = %alert.id,
            alert_type = ?alert.alert_type,
            level = alert.level.as_str(),
            message = %alert.message,
            "Cost alert emitted"
        );

        let snapshot: Vec<Arc<AlertHandler>> = match self.handlers.lock() {
            Ok(handlers) => handlers.list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_poisoned) => Vec::new(),
        };
        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(handler = index, alert_id = %alert.id, error = %e, "Alert handler failed");
                }
                Err(_panic) => {
                    tracing::warn!(handler = index, alert_id = %alert.id, "Alert handler panicked");
                }
            }
        }
        alert
    }

    // -----------------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------------

    /// One alert for a budget threshold crossing.
    pub fn budget_warning(&self, owner_id: &str, warning: &BudgetWarning) -> CostAlert {
        self.emit(
            AlertType::BudgetWarning,
            warning.level,
            warning.message.clone(),
            json!({
                "owner_id": owner_id,
                "period": warning.period,
                "percent_used": warning.percent_used,
                "threshold": warning.threshold,
            }),
        )
    }

    /// One alert for a denied request. `None` if the check allowed it.
    pub fn budget_exceeded(
        &self,
        owner_id: &str,
        proposed: Decimal,
        check: &BudgetCheck,
    ) -> Option<CostAlert> {
        if check.allowed {
            return None;
        }
        let limit = check.exceeded?;
        let (limit_name, limit_value, spent) = match limit {
            BudgetLimit::PerRequest => ("per_request", check.status.per_request_limit, None),
            BudgetLimit::Period { period } => {
                let status = check.status.period(period);
                (period.as_str(), status.limit, Some(status.spent))
            }
        };
        Some(self.emit(
            AlertType::BudgetExceeded,
            AlertLevel::Critical,
            check
                .reason
                .clone()
                .unwrap_or_else(|| format!("{limit_name} budget exceeded")),
            json!({
                "owner_id": owner_id,
                "limit": limit_name,
                "limit_value": limit_value,
                "spent": spent,
                "proposed": proposed,
            }),
        ))
    }

    /// Alert for an expensive request.
    ///
    /// `None` below the warning floor; critical above the critical floor.
    pub fn high_cost_request(
        &self,
        owner_id: &str,
        model: &str,
        cost: Decimal,
    ) -> Option<CostAlert> {
        if cost < self.config.high_cost_warning {
            return None;
        }
        let level = if cost > self.config.high_cost_critical {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        Some(self.emit(
            AlertType::HighCostRequest,
            level,
            format!("Request on {model} costs {cost}"),
            json!({
                "owner_id": owner_id,
                "model": model,
                "cost": cost,
                "warning_floor": self.config.high_cost_warning,
                "critical_floor": self.config.high_cost_critical,
            }),
        ))
    }

    /// Informational alert that a flat plan would be cheaper.
    ///
    /// `None` unless `recommended` is set.
    pub fn subscription_recommended(
        &self,
        owner_id: &str,
        plan: &str,
        monthly_price: Decimal,
        projected_pay_per_use: Decimal,
        recommended: bool,
    ) -> Option<CostAlert> {
        if !recommended {
            return None;
        }
        let savings = projected_pay_per_use
            .saturating_sub(monthly_price)
            .max(Decimal::ZERO);
        Some(self.emit(
            AlertType::SubscriptionRecommended,
            AlertLevel::Info,
            format!("The {plan} plan at {monthly_price}/month would save about {savings}"),
            json!({
                "owner_id": owner_id,
                "plan": plan,
                "monthly_price": monthly_price,
                "projected_pay_per_use": projected_pay_per_use,
                "savings": savings,
            }),
        ))
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Stored alerts matching `filter`, newest first.
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<CostAlert> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        history
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Mark one alert acknowledged. Returns whether it was found.
    pub fn acknowledge(&self, id: AlertId) -> bool {
        let Ok(mut history) = self.history.lock() else {
            return false;
        };
        history.iter_mut().find(|a| a.id == id).is_some_and(|a| {
            a.acknowledged = true;
            true
        })
    }

    /// Mark every stored alert acknowledged. Returns how many changed.
    pub fn acknowledge_all(&self) -> usize {
        let Ok(mut history) = self.history.lock() else {
            return 0;
        };
        let mut changed = 0usize;
        for alert in history.iter_mut().filter(|a| !a.acknowledged) {
            alert.acknowledged = true;
            changed = changed.saturating_add(1);
        }
        changed
    }

    /// Number of alerts currently retained.
    pub fn len(&self) -> usize {
        self.history.lock().map_or(0, |h| h.len())
    }

    /// Whether no alerts are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
