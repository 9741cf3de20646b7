//! Injectable wall clock.
//!
//! TTL expiry, budget period rollover, and analytics windows all depend on
//! the current time. Components take a [`Clock`] instead of calling
//! [`Utc::now`] directly so tests can pin and advance time.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
///
/// Uses enum dispatch rather than a trait object so the clock stays
/// `Clone` and cheap to pass around.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// The system clock.
    #[default]
    System,
    /// A manually controlled clock shared by every clone.
    Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
    /// Create a manual clock pinned at `start`.
    pub fn manual(start: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(Mutex::new(start)))
    }

    /// Current time according to this clock.
    ///
    /// A poisoned manual clock falls back to the system time.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Manual(at) => at.lock().map_or_else(|_| Utc::now(), |t| *t),
        }
    }

    /// Move a manual clock forward. No-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Self::Manual(at) = self
            && let Ok(mut t) = at.lock()
        {
            *t += by;
        }
    }

    /// Set a manual clock to an absolute time. No-op on the system clock.
    pub fn set(&self, to: DateTime<Utc>) {
        if let Self::Manual(at) = self
            && let Ok(mut t) = at.lock()
        {
            *t = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default();
        let clock = Clock::manual(start);
        let other = clock.clone();
        other.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[test]
    fn system_clock_ignores_advance() {
        let clock = Clock::System;
        let before = Utc::now();
        clock.advance(Duration::days(365));
        assert!(clock.now() < before + Duration::days(1));
    }
}
