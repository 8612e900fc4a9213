//! Clock and calendar context
//!
//! All date math is UTC. Weeks run Monday through Sunday; "last week" and
//! "last month" always mean the previous calendar week and month. A `Clock`
//! can be pinned to a fixed "today" for scenario replay; wall-clock reads
//! (`now_ms`, `now_iso`) are never overridden.

use chrono::{Datelike, Duration, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Precomputed calendar boundaries for a given "today".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeContext {
    pub today: NaiveDate,
    pub this_week_start: NaiveDate,
    pub this_week_end: NaiveDate,
    pub last_week_start: NaiveDate,
    pub last_week_end: NaiveDate,
    pub this_month_start: NaiveDate,
    pub this_month_end: NaiveDate,
    pub last_month_start: NaiveDate,
    pub last_month_end: NaiveDate,
}

impl TimeContext {
    /// Compute the context for an arbitrary day.
    pub fn for_today(today: NaiveDate) -> Self {
        let this_week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
        let this_week_end = this_week_start + Duration::days(6);
        let last_week_start = this_week_start - Duration::days(7);
        let last_week_end = this_week_start - Duration::days(1);

        let this_month_start = today.with_day(1).expect("day 1 is always valid");
        let this_month_end = end_of_month(this_month_start);
        let last_month_end = this_month_start - Duration::days(1);
        let last_month_start = last_month_end.with_day(1).expect("day 1 is always valid");

        Self {
            today,
            this_week_start,
            this_week_end,
            last_week_start,
            last_week_end,
            this_month_start,
            this_month_end,
            last_month_start,
            last_month_end,
        }
    }

    /// One-line rendering appended to user queries before planning.
    pub fn summary(&self) -> String {
        format!(
            "today={}; this week={}..{}; last week={}..{}; this month={}..{}; last month={}..{}",
            self.today,
            self.this_week_start,
            self.this_week_end,
            self.last_week_start,
            self.last_week_end,
            self.this_month_start,
            self.this_month_end,
            self.last_month_start,
            self.last_month_end,
        )
    }
}

fn end_of_month(month_start: NaiveDate) -> NaiveDate {
    let (year, month) = if month_start.month() == 12 {
        (month_start.year() + 1, 1)
    } else {
        (month_start.year(), month_start.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month rollover") - Duration::days(1)
}

/// Time source for the orchestrator. `today` may be pinned per run.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    today_override: Option<NaiveDate>,
}

impl Clock {
    /// Clock following the system calendar.
    pub fn system() -> Self {
        Self {
            today_override: None,
        }
    }

    /// Clock with a fixed "today" (scenario replay).
    pub fn fixed(today: NaiveDate) -> Self {
        Self {
            today_override: Some(today),
        }
    }

    /// Milliseconds since the Unix epoch (never overridden).
    pub fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Current instant as an RFC 3339 timestamp (never overridden).
    pub fn now_iso(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The effective "today".
    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Calendar boundaries for the effective "today".
    pub fn time_context(&self) -> TimeContext {
        TimeContext::for_today(self.today())
    }
}
