//! Partial updates (`$set`) applied to stored events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{Event, Origin, Priority, Recurrence};

/// A set of field assignments. `None` leaves a field alone; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_someday: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Option<Recurrence>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_event_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_recurring_event_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EventPatch {
    /// The fields an `ALL_EVENTS` edit carries to every row of a series.
    /// Dates and identity never cascade.
    pub fn cascade_from(source: &Event) -> Self {
        EventPatch {
            title: Some(source.title.clone()),
            description: Some(source.description.clone()),
            priority: Some(source.priority),
            origin: Some(source.origin),
            ..Default::default()
        }
    }

    /// Write back the ids the provider assigned.
    pub fn provider_ids(event_id: Option<String>, recurring_event_id: Option<String>) -> Self {
        EventPatch {
            provider_event_id: Some(event_id),
            provider_recurring_event_id: Some(recurring_event_id),
            ..Default::default()
        }
    }

    pub fn recurring_event_id(recurring_event_id: Option<String>) -> Self {
        EventPatch {
            provider_recurring_event_id: Some(recurring_event_id),
            ..Default::default()
        }
    }

    pub fn with_updated_at(mut self, now: DateTime<Utc>) -> Self {
        self.updated_at = Some(now);
        self
    }

    pub fn apply(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(description) = &self.description {
            event.description = description.clone();
        }
        if let Some(priority) = self.priority {
            event.priority = priority;
        }
        if let Some(origin) = self.origin {
            event.origin = origin;
        }
        if let Some(is_someday) = self.is_someday {
            event.is_someday = is_someday;
        }
        if let Some(recurrence) = &self.recurrence {
            event.recurrence = recurrence.clone();
        }
        if let Some(id) = &self.provider_event_id {
            event.provider_event_id = id.clone();
        }
        if let Some(id) = &self.provider_recurring_event_id {
            event.provider_recurring_event_id = id.clone();
        }
        if let Some(updated_at) = self.updated_at {
            event.updated_at = Some(updated_at);
        }
    }
}
