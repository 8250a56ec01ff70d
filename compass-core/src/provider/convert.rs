//! Conversions between local events and the provider wire shape.

use std::collections::BTreeMap;

use crate::error::{CompassError, CompassResult};
use crate::event::{Event, Origin, Priority, Recurrence, new_event_id};
use crate::provider::{
    ExtendedProperties, PROP_COMPASS_ID, PROP_ORIGIN, PROP_PRIORITY, ProviderEvent,
    ProviderStatus, ProviderTime,
};

pub trait ToProvider {
    fn to_provider(&self) -> ProviderEvent;
}

pub trait FromProvider {
    fn from_provider(calendar_id: &str, event: ProviderEvent) -> CompassResult<Self>
    where
        Self: Sized;
}

impl ToProvider for Event {
    fn to_provider(&self) -> ProviderEvent {
        let mut private = BTreeMap::new();
        private.insert(PROP_PRIORITY.to_string(), self.priority.as_str().to_string());
        private.insert(PROP_ORIGIN.to_string(), self.origin.as_str().to_string());
        private.insert(PROP_COMPASS_ID.to_string(), self.id.clone());

        // Instances only point at their series once the base has been mirrored
        let recurring_event_id = if self.rule().is_none() {
            self.provider_recurring_event_id.clone()
        } else {
            None
        };

        ProviderEvent {
            id: self.provider_event_id.clone().unwrap_or_default(),
            status: ProviderStatus::Confirmed,
            summary: self.title.clone(),
            description: self.description.clone(),
            start: ProviderTime::from(&self.start_date),
            end: ProviderTime::from(&self.end_date),
            recurrence: self.rule().map(<[String]>::to_vec).unwrap_or_default(),
            recurring_event_id,
            extended_properties: Some(ExtendedProperties { private }),
            updated: self.updated_at,
        }
    }
}

impl FromProvider for Event {
    /// Instances come back pointing `recurrence.eventId` at the provider's
    /// series id; the caller maps it onto the local base.
    fn from_provider(calendar_id: &str, event: ProviderEvent) -> CompassResult<Self> {
        if !event.recurrence.is_empty() && event.recurring_event_id.is_some() {
            return Err(CompassError::AmbiguousRecurrence(event.id));
        }

        let start_date = event.start.to_event_time().ok_or_else(|| {
            CompassError::InvalidEvent(event.id.clone(), "event has no start time".into())
        })?;
        let end_date = event.end.to_event_time().ok_or_else(|| {
            CompassError::InvalidEvent(event.id.clone(), "event has no end time".into())
        })?;

        let id = event
            .private_property(PROP_COMPASS_ID)
            .map(String::from)
            .unwrap_or_else(new_event_id);
        let priority = event
            .private_property(PROP_PRIORITY)
            .and_then(Priority::parse)
            .unwrap_or_default();
        let origin = event
            .private_property(PROP_ORIGIN)
            .and_then(Origin::parse)
            .unwrap_or(Origin::Provider);

        let recurrence = if !event.recurrence.is_empty() {
            Some(Recurrence {
                rule: Some(event.recurrence),
                event_id: Some(id.clone()),
            })
        } else {
            event.recurring_event_id.as_ref().map(|series| Recurrence {
                rule: None,
                event_id: Some(series.clone()),
            })
        };

        Ok(Event {
            id,
            calendar_id: calendar_id.to_string(),
            title: event.summary,
            description: event.description,
            is_all_day: start_date.is_date(),
            start_date,
            end_date,
            is_someday: false,
            priority,
            recurrence,
            origin,
            provider_event_id: Some(event.id).filter(|id| !id.is_empty()),
            provider_recurring_event_id: event.recurring_event_id,
            updated_at: event.updated,
        })
    }
}
