//! Store query filters.
//!
//! Filters are a small typed query language (equality, `$ne`, `$gt`, `$gte`,
//! `$lte`, `$in`, `$and`, `$or`) that stores can either evaluate in process
//! via [`Filter::matches`] or translate from [`Filter::to_document`].

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::change::ApplyTo;
use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult};
use crate::event::{Event, EventTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    CalendarId,
    RecurrenceEventId,
    StartDate,
    EndDate,
    IsSomeday,
    ProviderEventId,
    ProviderRecurringEventId,
}

impl Field {
    /// Document path of the field.
    pub fn path(&self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::CalendarId => "calendarId",
            Field::RecurrenceEventId => "recurrence.eventId",
            Field::StartDate => "startDate",
            Field::EndDate => "endDate",
            Field::IsSomeday => "isSomeday",
            Field::ProviderEventId => "providerEventId",
            Field::ProviderRecurringEventId => "providerRecurringEventId",
        }
    }

    fn value_of(&self, event: &Event) -> FilterValue {
        let opt_str = |s: Option<&str>| s.map_or(FilterValue::Null, |s| FilterValue::Str(s.into()));
        match self {
            Field::Id => FilterValue::Str(event.id.clone()),
            Field::CalendarId => FilterValue::Str(event.calendar_id.clone()),
            Field::RecurrenceEventId => opt_str(event.recurrence_event_id()),
            Field::StartDate => FilterValue::Time(event.start_date.clone()),
            Field::EndDate => FilterValue::Time(event.end_date.clone()),
            Field::IsSomeday => FilterValue::Bool(event.is_someday),
            Field::ProviderEventId => opt_str(event.provider_event_id.as_deref()),
            Field::ProviderRecurringEventId => {
                opt_str(event.provider_recurring_event_id.as_deref())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Str(String),
    Time(EventTime),
}

impl FilterValue {
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Null, FilterValue::Null) => Some(Ordering::Equal),
            (FilterValue::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
            (FilterValue::Str(a), FilterValue::Str(b)) => Some(a.cmp(b)),
            (FilterValue::Time(a), FilterValue::Time(b)) => Some(a.instant().cmp(&b.instant())),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::Str(s) => Value::String(s.clone()),
            FilterValue::Time(t) => Value::String(t.to_string()),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Str(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Str(s)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

impl From<&EventTime> for FilterValue {
    fn from(t: &EventTime) -> Self {
        FilterValue::Time(t.clone())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FilterValue::Time(EventTime::DateTime(dt.fixed_offset()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(Field, FilterValue),
    Ne(Field, FilterValue),
    Gt(Field, FilterValue),
    Gte(Field, FilterValue),
    Lte(Field, FilterValue),
    In(Field, Vec<FilterValue>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn ne(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::Ne(field, value.into())
    }

    pub fn gt(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::Gt(field, value.into())
    }

    pub fn gte(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::Gte(field, value.into())
    }

    pub fn lte(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::Lte(field, value.into())
    }

    pub fn one_of<V: Into<FilterValue>>(field: Field, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field, values.into_iter().map(Into::into).collect())
    }

    /// Every filter is scoped to a calendar.
    fn scoped(calendar_id: &str, rest: Vec<Filter>) -> Self {
        let mut all = vec![Filter::eq(Field::CalendarId, calendar_id)];
        all.extend(rest);
        Filter::And(all)
    }

    pub fn calendar(calendar_id: &str) -> Self {
        Filter::scoped(calendar_id, vec![])
    }

    pub fn by_id(calendar_id: &str, id: &str) -> Self {
        Filter::scoped(calendar_id, vec![Filter::eq(Field::Id, id)])
    }

    /// Base row plus every instance (the base self-references).
    pub fn series(calendar_id: &str, base_id: &str) -> Self {
        Filter::scoped(calendar_id, vec![Filter::eq(Field::RecurrenceEventId, base_id)])
    }

    /// Instance rows of a series, excluding the base row.
    pub fn series_instances(calendar_id: &str, base_id: &str) -> Self {
        Filter::scoped(
            calendar_id,
            vec![
                Filter::eq(Field::RecurrenceEventId, base_id),
                Filter::ne(Field::Id, base_id),
            ],
        )
    }

    pub fn by_provider_id(calendar_id: &str, provider_event_id: &str) -> Self {
        Filter::scoped(
            calendar_id,
            vec![Filter::eq(Field::ProviderEventId, provider_event_id)],
        )
    }

    pub fn matches(&self, event: &Event) -> bool {
        let cmp = |field: &Field, value: &FilterValue| field.value_of(event).compare(value);
        match self {
            Filter::Eq(f, v) => cmp(f, v) == Some(Ordering::Equal),
            Filter::Ne(f, v) => cmp(f, v) != Some(Ordering::Equal),
            Filter::Gt(f, v) => cmp(f, v) == Some(Ordering::Greater),
            Filter::Gte(f, v) => matches!(cmp(f, v), Some(Ordering::Greater | Ordering::Equal)),
            Filter::Lte(f, v) => matches!(cmp(f, v), Some(Ordering::Less | Ordering::Equal)),
            Filter::In(f, vs) => vs.iter().any(|v| cmp(f, v) == Some(Ordering::Equal)),
            Filter::And(fs) => fs.iter().all(|f| f.matches(event)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(event)),
        }
    }

    /// Mongo-style query document, e.g. `{"calendarId": "c", "_id": "e"}`.
    pub fn to_document(&self) -> Value {
        let op = |f: &Field, name: &str, v: Value| single(f.path(), single(name, v));
        match self {
            Filter::Eq(f, v) => single(f.path(), v.to_json()),
            Filter::Ne(f, v) => op(f, "$ne", v.to_json()),
            Filter::Gt(f, v) => op(f, "$gt", v.to_json()),
            Filter::Gte(f, v) => op(f, "$gte", v.to_json()),
            Filter::Lte(f, v) => op(f, "$lte", v.to_json()),
            Filter::In(f, vs) => op(f, "$in", vs.iter().map(FilterValue::to_json).collect()),
            Filter::Or(fs) => json!({ "$or": fs.iter().map(Filter::to_document).collect::<Vec<_>>() }),
            Filter::And(fs) => {
                let docs: Vec<Value> = fs.iter().map(Filter::to_document).collect();
                merge_documents(&docs).unwrap_or_else(|| json!({ "$and": docs }))
            }
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Flatten `$and` children into one document when their keys are disjoint.
fn merge_documents(docs: &[Value]) -> Option<Value> {
    let mut merged = Map::new();
    for doc in docs {
        for (key, value) in doc.as_object()? {
            if merged.insert(key.clone(), value.clone()).is_some() {
                return None;
            }
        }
    }
    Some(Value::Object(merged))
}

/// Filter selecting the rows a deletion of `event` removes under `scope`.
///
/// - standalone events and `ThisEvent`: the row itself
/// - `ThisAndFollowingEvents`: the row plus every sibling strictly later
/// - `AllEvents`: the base and all of its instances
pub fn deletion_filter(event: &Event, scope: ApplyTo) -> CompassResult<Filter> {
    let calendar_id = event.calendar_id.as_str();

    let Some(recurrence) = &event.recurrence else {
        return Ok(Filter::by_id(calendar_id, &event.id));
    };

    let series_id = match (recurrence.event_id.as_deref(), recurrence.rule.is_some()) {
        (Some(id), _) => id,
        (None, true) => event.id.as_str(),
        (None, false) => return Err(CompassError::MissingRecurrenceId(event.id.clone())),
    };

    let filter = match scope {
        ApplyTo::ThisEvent => Filter::by_id(calendar_id, &event.id),
        ApplyTo::ThisAndFollowingEvents => Filter::scoped(
            calendar_id,
            vec![Filter::Or(vec![
                Filter::eq(Field::Id, event.id.as_str()),
                Filter::And(vec![
                    Filter::eq(Field::RecurrenceEventId, series_id),
                    Filter::gt(Field::StartDate, &event.start_date),
                    Filter::gt(Field::EndDate, &event.end_date),
                ]),
            ])],
        ),
        ApplyTo::AllEvents => Filter::series(calendar_id, series_id),
    };

    Ok(filter)
}

/// Events of one partition (someday or scheduled) contained in or
/// overlapping `range`. Bounds are inclusive.
pub fn window(calendar_id: &str, range: &DateRange, someday: bool) -> Filter {
    let mut contained = Vec::new();
    let mut overlapping = Vec::new();

    if let Some(from) = range.from {
        contained.push(Filter::gte(Field::StartDate, from));
        overlapping.push(Filter::gte(Field::EndDate, from));
    }
    if let Some(to) = range.to {
        contained.push(Filter::lte(Field::EndDate, to));
        overlapping.push(Filter::lte(Field::StartDate, to));
    }

    let mut all = vec![Filter::eq(Field::IsSomeday, someday)];
    if range.from.is_some() || range.to.is_some() {
        all.push(Filter::Or(vec![
            Filter::And(contained),
            Filter::And(overlapping),
        ]));
    }

    Filter::scoped(calendar_id, all)
}
