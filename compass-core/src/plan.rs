//! Write plans produced by the scope resolver.

use std::fmt;

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

use crate::category::Category;
use crate::event::Event;
use crate::filter::Filter;
use crate::provider::ProviderRef;
use crate::store::StoreWrite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Updated,
    Deleted,
}

impl WriteKind {
    pub fn label(&self) -> &'static str {
        match self {
            WriteKind::Created => "CREATED",
            WriteKind::Updated => "UPDATED",
            WriteKind::Deleted => "DELETED",
        }
    }
}

/// Operation tag, e.g. `RECURRENCE_BASE_CREATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub category: Category,
    pub write: WriteKind,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.category.label(), self.write.label())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Category before and after a write. Serialized as
/// `["RECURRENCE_BASE", "RECURRENCE_BASE_CONFIRMED"]`, with `null` for the
/// missing side of creates and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<Category>,
    pub to: Option<Category>,
}

impl Transition {
    pub fn created(to: Category) -> Self {
        Transition { from: None, to: Some(to) }
    }

    pub fn updated(from: Category, to: Category) -> Self {
        Transition {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn deleted(from: Category) -> Self {
        Transition { from: Some(from), to: None }
    }

    pub fn from_label(&self) -> Option<String> {
        self.from.map(|c| c.label().to_string())
    }

    pub fn to_label(&self) -> Option<String> {
        self.to.map(|c| format!("{}_CONFIRMED", c.label()))
    }
}

impl Serialize for Transition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.from_label())?;
        tuple.serialize_element(&self.to_label())?;
        tuple.end()
    }
}

/// What happens on the provider once the store write has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderAction {
    Skip,
    /// Mirror the written row. With `link_instances` the series instances
    /// get the returned id as their recurring event id.
    Push { link_instances: bool },
    Remove(Vec<ProviderRef>),
    /// Cancel these instance occurrences on their provider series.
    Cancel(Vec<Event>),
}

impl ProviderAction {
    /// Remove every mirrored row among `rows`, or skip when none is.
    pub fn remove_all<'a>(rows: impl IntoIterator<Item = &'a Event>) -> Self {
        let refs: Vec<ProviderRef> = rows
            .into_iter()
            .filter_map(|e| {
                e.provider_event_id
                    .as_deref()
                    .map(|id| ProviderRef::new(&e.calendar_id, id))
            })
            .collect();
        if refs.is_empty() {
            ProviderAction::Skip
        } else {
            ProviderAction::Remove(refs)
        }
    }

    /// Cancel the occurrences `rows` stand for on `base`'s provider series.
    /// Without a mirrored base only individually mirrored rows are removed.
    pub fn cancel_occurrences<'a>(rows: impl IntoIterator<Item = &'a Event>, base: &Event) -> Self {
        let Some(series) = base.provider_event_id.as_deref() else {
            return ProviderAction::remove_all(rows);
        };
        let cancelled: Vec<Event> = rows
            .into_iter()
            .filter(|row| !row.is_someday)
            .map(|row| {
                let mut row = row.clone();
                row.provider_recurring_event_id = Some(series.to_string());
                row
            })
            .collect();
        if cancelled.is_empty() {
            ProviderAction::Skip
        } else {
            ProviderAction::Cancel(cancelled)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub write: StoreWrite,
    pub category: Category,
    pub transition: Transition,
    pub title: String,
    /// Only reported items produce a change summary; cascaded sibling
    /// writes ride along silently.
    pub reported: bool,
    pub provider: ProviderAction,
}

impl PlanItem {
    pub fn create(event: Event, category: Category) -> Self {
        PlanItem {
            title: event.title().to_string(),
            write: StoreWrite::Insert(event),
            category,
            transition: Transition::created(category),
            reported: false,
            provider: ProviderAction::Skip,
        }
    }

    pub fn update(event: Event, from: Category, to: Category) -> Self {
        PlanItem {
            title: event.title().to_string(),
            write: StoreWrite::Replace(event),
            category: to,
            transition: Transition::updated(from, to),
            reported: false,
            provider: ProviderAction::Skip,
        }
    }

    pub fn delete(filter: Filter, title: &str, from: Category) -> Self {
        PlanItem {
            title: title.to_string(),
            write: StoreWrite::Delete(filter),
            category: from,
            transition: Transition::deleted(from),
            reported: false,
            provider: ProviderAction::Skip,
        }
    }

    pub fn reported(mut self) -> Self {
        self.reported = true;
        self
    }

    pub fn with_provider(mut self, provider: ProviderAction) -> Self {
        self.provider = provider;
        self
    }

    pub fn kind(&self) -> WriteKind {
        match self.write {
            StoreWrite::Insert(_) => WriteKind::Created,
            StoreWrite::Replace(_) => WriteKind::Updated,
            StoreWrite::Delete(_) => WriteKind::Deleted,
        }
    }

    pub fn operation(&self) -> Operation {
        Operation {
            category: self.category,
            write: self.kind(),
        }
    }

    /// The row written, for inserts and replacements.
    pub fn event(&self) -> Option<&Event> {
        match &self.write {
            StoreWrite::Insert(e) | StoreWrite::Replace(e) => Some(e),
            StoreWrite::Delete(_) => None,
        }
    }
}

/// Ordered writes for one change request. Store writes apply in order as a
/// single commit; series bases come last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub items: Vec<PlanItem>,
}

impl WritePlan {
    pub fn new(items: Vec<PlanItem>) -> Self {
        WritePlan { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn store_writes(&self) -> Vec<StoreWrite> {
        self.items.iter().map(|item| item.write.clone()).collect()
    }

    pub fn reported(&self) -> impl Iterator<Item = &PlanItem> {
        self.items.iter().filter(|item| item.reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::SeriesRole;
    use serde_json::json;

    #[test]
    fn test_operation_tags() {
        let op = Operation {
            category: Category::RecurrenceBase,
            write: WriteKind::Created,
        };
        assert_eq!(op.to_string(), "RECURRENCE_BASE_CREATED");

        let op = Operation {
            category: Category::Someday(SeriesRole::Base),
            write: WriteKind::Updated,
        };
        assert_eq!(serde_json::to_value(op).unwrap(), json!("RECURRENCE_BASE_SOMEDAY_UPDATED"));
    }

    #[test]
    fn test_transition_shape() {
        assert_eq!(
            serde_json::to_value(Transition::created(Category::RecurrenceBase)).unwrap(),
            json!([null, "RECURRENCE_BASE_CONFIRMED"])
        );
        assert_eq!(
            serde_json::to_value(Transition::updated(
                Category::RecurrenceBase,
                Category::Regular
            ))
            .unwrap(),
            json!(["RECURRENCE_BASE", "REGULAR_CONFIRMED"])
        );
        assert_eq!(
            serde_json::to_value(Transition::deleted(Category::Regular)).unwrap(),
            json!(["REGULAR", null])
        );
    }
}
