//! Event records as stored locally.
//!
//! One `Event` type covers every category (regular, recurrence base,
//! recurrence instance, someday). The category is never stored: it is derived
//! from the field shape by [`crate::category::classify`].

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CompassError, CompassResult};

/// Generate a fresh opaque event id.
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A calendar event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id", alias = "id", default = "new_event_id")]
    pub id: String,
    pub calendar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: EventTime,
    pub end_date: EventTime,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub is_someday: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_recurring_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Recurrence linkage of an event.
///
/// `rule` set marks a series base, `event_id` pointing at another event marks
/// an instance. Stored bases point `event_id` at themselves so a single
/// `recurrence.eventId == base` query reaches the whole series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(default)]
    pub rule: Option<Vec<String>>,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Unassigned,
    Work,
    #[serde(rename = "self")]
    SelfCare,
    Relations,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Unassigned => "unassigned",
            Priority::Work => "work",
            Priority::SelfCare => "self",
            Priority::Relations => "relations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unassigned" => Some(Priority::Unassigned),
            "work" => Some(Priority::Work),
            "self" => Some(Priority::SelfCare),
            "relations" => Some(Priority::Relations),
            _ => None,
        }
    }
}

/// Where the record's data last came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    #[default]
    CompassNative,
    Provider,
    ProviderImport,
    Unsure,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::CompassNative => "compass-native",
            Origin::Provider => "provider",
            Origin::ProviderImport => "provider-import",
            Origin::Unsure => "unsure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compass-native" => Some(Origin::CompassNative),
            "provider" => Some(Origin::Provider),
            "provider-import" => Some(Origin::ProviderImport),
            "unsure" => Some(Origin::Unsure),
            _ => None,
        }
    }
}

/// Start or end of an event: a date for all-day events, otherwise a
/// date-time with an explicit UTC offset. No timezone conversion happens here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

impl EventTime {
    /// Point in time used for ordering and filter comparisons.
    /// Dates count from midnight UTC.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
            EventTime::DateTime(dt) => dt.with_timezone(&Utc),
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::Date(d) => *d,
            EventTime::DateTime(dt) => dt.date_naive(),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    pub fn parse(s: &str) -> CompassResult<Self> {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(EventTime::Date(d));
        }
        DateTime::parse_from_rfc3339(s)
            .map(EventTime::DateTime)
            .map_err(|e| CompassError::Serialization(format!("Invalid event time '{s}': {e}")))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

impl TryFrom<String> for EventTime {
    type Error = CompassError;

    fn try_from(s: String) -> CompassResult<Self> {
        EventTime::parse(&s)
    }
}

impl From<EventTime> for String {
    fn from(t: EventTime) -> Self {
        t.to_string()
    }
}

impl Event {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    pub fn rule(&self) -> Option<&[String]> {
        self.recurrence.as_ref()?.rule.as_deref()
    }

    pub fn recurrence_event_id(&self) -> Option<&str> {
        self.recurrence.as_ref()?.event_id.as_deref()
    }

    /// Id of the series this row belongs to, if any. Bases with a rule but no
    /// stored self-reference still root their own series.
    pub fn series_id(&self) -> Option<&str> {
        match self.recurrence_event_id() {
            Some(id) => Some(id),
            None if self.rule().is_some() => Some(&self.id),
            None => None,
        }
    }

    /// True when the record has a rule *and* points at a different event.
    pub fn has_ambiguous_recurrence(&self) -> bool {
        self.rule().is_some() && self.recurrence_event_id().is_some_and(|id| id != self.id)
    }

    /// Drop every provider correlation id.
    pub fn strip_provider_ids(&mut self) {
        self.provider_event_id = None;
        self.provider_recurring_event_id = None;
    }

    /// Check `startDate <= endDate` and the all-day/date-shape agreement.
    pub fn validate(&self) -> CompassResult<()> {
        if self.start_date.instant() > self.end_date.instant() {
            return Err(CompassError::InvalidEvent(
                self.id.clone(),
                format!("start {} is after end {}", self.start_date, self.end_date),
            ));
        }
        if self.start_date.is_date() != self.end_date.is_date() {
            return Err(CompassError::InvalidEvent(
                self.id.clone(),
                "start and end must both be dates or both be date-times".into(),
            ));
        }
        if self.is_all_day != self.start_date.is_date() {
            return Err(CompassError::InvalidEvent(
                self.id.clone(),
                format!("isAllDay is {} but dates are {}", self.is_all_day, self.start_date),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title(), self.start_date)
    }
}
