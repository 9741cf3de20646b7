//! Wall-clock-aligned budget windows.
//!
//! All boundaries are UTC: days start at midnight, weeks on ISO Monday,
//! months on the first.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use spendguard_types::BudgetPeriod;

/// One instance of a budget period, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    /// The instance of `period` containing `now`.
    pub fn containing(period: BudgetPeriod, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let (start, end) = match period {
            BudgetPeriod::Daily => (Some(today), today.checked_add_days(Days::new(1))),
            BudgetPeriod::Weekly => {
                let back = u64::from(today.weekday().num_days_from_monday());
                let monday = today.checked_sub_days(Days::new(back));
                (monday, monday.and_then(|d| d.checked_add_days(Days::new(7))))
            }
            BudgetPeriod::Monthly => {
                let first = today.with_day(1);
                (first, first.and_then(|d| d.checked_add_months(Months::new(1))))
            }
        };
        Self {
            start: start.map_or(DateTime::<Utc>::MIN_UTC, midnight),
            end: end.map_or(DateTime::<Utc>::MAX_UTC, midnight),
        }
    }

    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
