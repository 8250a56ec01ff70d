//! Time windows for listing and pulling events.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::event::EventTime;

/// A window over event time. An open side is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        DateRange {
            from: None,
            to: None,
        }
    }

    /// Window from command-line bounds, in whole UTC days. `start` opens
    /// the past; a missing bound lies `days` away from now.
    pub fn from_args(from: Option<&str>, to: Option<&str>, days: i64) -> Result<Self, String> {
        let now = Utc::now();
        let span = Duration::days(days);

        let from = match from {
            Some("start") => None,
            Some(day) => Some(midnight(parse_day(day)?)),
            None => Some(now - span),
        };
        let to = match to {
            Some(day) => Some(midnight(parse_day(day)?) + Duration::days(1) - Duration::seconds(1)),
            None => Some(now + span),
        };

        Ok(DateRange { from, to })
    }

    /// Lower bound sent to providers; the epoch when open.
    pub fn from_rfc3339(&self) -> String {
        self.from.unwrap_or(DateTime::UNIX_EPOCH).to_rfc3339()
    }

    /// Upper bound sent to providers; 2100-01-01 when open.
    pub fn to_rfc3339(&self) -> String {
        self.to.unwrap_or_else(|| midnight(far_future())).to_rfc3339()
    }

    /// Inclusive overlap with an event's span.
    pub fn overlaps(&self, start: &EventTime, end: &EventTime) -> bool {
        self.to.is_none_or(|to| start.instant() <= to)
            && self.from.is_none_or(|from| end.instant() >= from)
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 1, 1).unwrap_or(NaiveDate::MAX)
}
