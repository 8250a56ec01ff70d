//! External calendar provider collaborator.
//!
//! Providers speak a Google-calendar-like wire shape ([`ProviderEvent`]).
//! [`ProviderClient`] is the raw API; [`ProviderSync`] is the only caller of
//! it and adds timeouts, someday guarding and idempotent deletes.

pub mod convert;
mod memory;
pub mod protocol;
mod subprocess;
mod sync;

pub use convert::{FromProvider, ToProvider};
pub use memory::MemoryProvider;
pub use subprocess::SubprocessProvider;
pub use sync::{DEFAULT_PROVIDER_TIMEOUT, ProviderSync};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::date_range::DateRange;
use crate::error::CompassResult;
use crate::event::EventTime;

/// Private extended property keys written on every pushed event.
pub const PROP_PRIORITY: &str = "priority";
pub const PROP_ORIGIN: &str = "origin";
pub const PROP_COMPASS_ID: &str = "compassEventId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

/// Start or end on the wire: `date` for all-day events, `dateTime` otherwise.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<FixedOffset>>,
}

impl ProviderTime {
    pub fn to_event_time(&self) -> Option<EventTime> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Some(EventTime::DateTime(dt)),
            (None, Some(d)) => Some(EventTime::Date(d)),
            (None, None) => None,
        }
    }
}

impl From<&EventTime> for ProviderTime {
    fn from(time: &EventTime) -> Self {
        match time {
            EventTime::Date(d) => ProviderTime {
                date: Some(*d),
                date_time: None,
            },
            EventTime::DateTime(dt) => ProviderTime {
                date: None,
                date_time: Some(*dt),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtendedProperties {
    #[serde(default)]
    pub private: BTreeMap<String, String>,
}

/// An event as the provider stores it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    /// Provider-assigned id; empty before the first insert.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub start: ProviderTime,
    #[serde(default)]
    pub end: ProviderTime,
    /// RRULE lines; non-empty only on series bases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    /// Provider id of the series an instance belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<ExtendedProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl ProviderEvent {
    pub fn private_property(&self, key: &str) -> Option<&str> {
        self.extended_properties
            .as_ref()?
            .private
            .get(key)
            .map(String::as_str)
    }
}

/// Location of a mirrored event on the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRef {
    pub calendar_id: String,
    pub event_id: String,
    pub recurring_event_id: Option<String>,
}

impl ProviderRef {
    pub fn new(calendar_id: &str, event_id: &str) -> Self {
        ProviderRef {
            calendar_id: calendar_id.to_string(),
            event_id: event_id.to_string(),
            recurring_event_id: None,
        }
    }
}

/// Raw provider API, keyed by calendar id and provider event id.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn insert(&self, calendar_id: &str, event: &ProviderEvent) -> CompassResult<ProviderEvent>;

    async fn update(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &ProviderEvent,
    ) -> CompassResult<ProviderEvent>;

    /// Fails with [`crate::CompassError::ProviderGone`] when the event no
    /// longer exists.
    async fn delete(&self, calendar_id: &str, event_id: &str) -> CompassResult<()>;

    /// Events overlapping `range`, cancelled ones included.
    async fn list(&self, calendar_id: &str, range: &DateRange) -> CompassResult<Vec<ProviderEvent>>;
}
