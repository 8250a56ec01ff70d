//! Event category classification.
//!
//! Categories are derived from the field shape once, at the boundary, and
//! pattern-matched everywhere downstream.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::event::Event;

/// Position of an event within a series, independent of scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesRole {
    Standalone,
    Base,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Regular,
    RecurrenceBase,
    RecurrenceInstance,
    /// Unscheduled. Keeps its series role so someday series survive
    /// conversions in both directions.
    Someday(SeriesRole),
}

impl Category {
    pub fn new(role: SeriesRole, someday: bool) -> Self {
        match (role, someday) {
            (role, true) => Category::Someday(role),
            (SeriesRole::Standalone, false) => Category::Regular,
            (SeriesRole::Base, false) => Category::RecurrenceBase,
            (SeriesRole::Instance, false) => Category::RecurrenceInstance,
        }
    }

    pub fn role(&self) -> SeriesRole {
        match self {
            Category::Regular => SeriesRole::Standalone,
            Category::RecurrenceBase => SeriesRole::Base,
            Category::RecurrenceInstance => SeriesRole::Instance,
            Category::Someday(role) => *role,
        }
    }

    pub fn is_someday(&self) -> bool {
        matches!(self, Category::Someday(_))
    }

    /// Category of the instances of a series whose base has this category.
    pub fn instance_counterpart(&self) -> Self {
        Category::new(SeriesRole::Instance, self.is_someday())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Regular => "REGULAR",
            Category::RecurrenceBase => "RECURRENCE_BASE",
            Category::RecurrenceInstance => "RECURRENCE_INSTANCE",
            Category::Someday(SeriesRole::Standalone) => "SOMEDAY",
            Category::Someday(SeriesRole::Base) => "RECURRENCE_BASE_SOMEDAY",
            Category::Someday(SeriesRole::Instance) => "RECURRENCE_INSTANCE_SOMEDAY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Classify an event from its field shape.
///
/// A rule always wins: a record carrying a rule and a foreign
/// `recurrence.eventId` is treated as a base and a warning is logged.
/// Callers that accept input reject that shape before it gets here.
pub fn classify(event: &Event) -> Category {
    let role = match &event.recurrence {
        Some(rec) if rec.rule.is_some() => {
            if event.has_ambiguous_recurrence() {
                tracing::warn!(
                    event_id = %event.id,
                    "event has both a recurrence rule and a foreign recurrence id; treating as base"
                );
            }
            SeriesRole::Base
        }
        Some(rec) => match rec.event_id.as_deref() {
            Some(base_id) if base_id != event.id => SeriesRole::Instance,
            _ => SeriesRole::Standalone,
        },
        None => SeriesRole::Standalone,
    };

    Category::new(role, event.is_someday)
}
