//! RRULE expansion for recurring series.
//!
//! Only weekly and monthly cadences are supported. Each occurrence is mapped
//! onto a fixed calendar window (Sunday..Saturday for weekly, the calendar
//! month for monthly) instead of copying the anchor's span, so repeated
//! expansions from anchors in the same window produce identical instances.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use rrule::RRuleSet;

use crate::error::{CompassError, CompassResult};
use crate::event::{Event, EventTime, Recurrence, new_event_id};

/// Materialisation horizon for rules without COUNT or UNTIL.
pub const DEFAULT_MAX_INSTANCES: u16 = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Weekly,
    Monthly,
}

/// A parsed, supported recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    cadence: Cadence,
    /// RRULE parts in their original order, FREQ included.
    parts: Vec<(String, String)>,
}

impl RecurrenceRule {
    /// Parse the `rule` lines stored on a base. Exactly one RRULE line with
    /// FREQ=WEEKLY or FREQ=MONTHLY is accepted.
    pub fn parse(lines: &[String]) -> CompassResult<Self> {
        let unsupported = || CompassError::UnsupportedRule(lines.join("\n"));

        let [line] = lines else {
            return Err(unsupported());
        };
        let body = line.strip_prefix("RRULE:").unwrap_or(line);

        let mut parts = Vec::new();
        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(unsupported)?;
            parts.push((key.trim().to_ascii_uppercase(), value.trim().to_string()));
        }

        let cadence = match parts.iter().find(|(k, _)| k == "FREQ").map(|(_, v)| v.as_str()) {
            Some("WEEKLY") => Cadence::Weekly,
            Some("MONTHLY") => Cadence::Monthly,
            _ => return Err(unsupported()),
        };

        Ok(RecurrenceRule { cadence, parts })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn count(&self) -> Option<u32> {
        self.get("COUNT").and_then(|v| v.parse().ok())
    }

    fn with_part(&self, key: &str, value: String, drop: &str) -> Self {
        let mut parts: Vec<_> = self
            .parts
            .iter()
            .filter(|(k, _)| k != drop)
            .cloned()
            .collect();
        match parts.iter_mut().find(|(k, _)| k == key) {
            Some(part) => part.1 = value,
            None => parts.push((key.to_string(), value)),
        }
        RecurrenceRule {
            cadence: self.cadence,
            parts,
        }
    }

    /// Same rule limited to `count` occurrences.
    pub fn with_count(&self, count: usize) -> Self {
        self.with_part("COUNT", count.to_string(), "UNTIL")
    }

    /// Same rule ending on the day before `date`.
    pub fn ending_before(&self, date: NaiveDate) -> Self {
        let last_day = date - Duration::days(1);
        self.with_part("UNTIL", format!("{}T235959Z", last_day.format("%Y%m%d")), "COUNT")
    }

    /// Rule for the tail of a split series holding `remaining` instances.
    /// Unbounded and UNTIL-bounded rules carry over unchanged.
    pub fn remainder(&self, remaining: usize) -> Self {
        match self.count() {
            Some(_) => self.with_count(remaining),
            None => self.clone(),
        }
    }

    fn body(&self) -> String {
        self.parts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Rule lines as stored on a base event.
    pub fn to_lines(&self) -> Vec<String> {
        vec![format!("RRULE:{}", self.body())]
    }
}

/// One element of an expansion: the base (first, when requested) or an
/// instance window. Instances carry no id; the caller assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub id: Option<String>,
    pub start_date: EventTime,
    pub end_date: EventTime,
    pub recurrence: Recurrence,
}

impl EventDraft {
    /// Materialise the draft using `template` for every non-structural field.
    /// Provider ids never carry over; the provider sync assigns them.
    pub fn into_event(self, template: &Event) -> Event {
        let mut event = template.clone();
        event.id = self.id.unwrap_or_else(new_event_id);
        event.start_date = self.start_date;
        event.end_date = self.end_date;
        event.recurrence = Some(self.recurrence);
        event.strip_provider_ids();
        event.updated_at = None;
        event
    }
}

/// Expand `rule` anchored at the base window `[anchor_start, anchor_end]`.
///
/// Without `base_id` the first element is a new base draft whose
/// `recurrence.eventId` references its own freshly generated id. With
/// `base_id` only instances are returned, all referencing it.
pub fn expand(
    rule: &RecurrenceRule,
    anchor_start: &EventTime,
    anchor_end: &EventTime,
    base_id: Option<&str>,
) -> CompassResult<Vec<EventDraft>> {
    expand_with_limit(rule, anchor_start, anchor_end, base_id, DEFAULT_MAX_INSTANCES)
}

/// [`expand`] with an explicit cap on materialised instances.
pub fn expand_with_limit(
    rule: &RecurrenceRule,
    anchor_start: &EventTime,
    anchor_end: &EventTime,
    base_id: Option<&str>,
    limit: u16,
) -> CompassResult<Vec<EventDraft>> {
    if anchor_start.instant() > anchor_end.instant() {
        return Err(CompassError::InvalidEvent(
            base_id.unwrap_or_default().to_string(),
            format!("anchor start {anchor_start} is after anchor end {anchor_end}"),
        ));
    }

    let mut windows = occurrence_windows(rule, anchor_start.date(), limit)?;
    // Several BYDAY hits in one week map onto the same window
    windows.dedup();

    let mut drafts = Vec::with_capacity(windows.len() + 1);

    let base_id = match base_id {
        Some(id) => id.to_string(),
        None => {
            let id = new_event_id();
            drafts.push(EventDraft {
                id: Some(id.clone()),
                start_date: anchor_start.clone(),
                end_date: anchor_end.clone(),
                recurrence: Recurrence {
                    rule: Some(rule.to_lines()),
                    event_id: Some(id.clone()),
                },
            });
            id
        }
    };

    for (first_day, last_day) in windows {
        let (start_date, end_date) = window_times(first_day, last_day, anchor_start)?;
        drafts.push(EventDraft {
            id: None,
            start_date,
            end_date,
            recurrence: Recurrence {
                rule: None,
                event_id: Some(base_id.clone()),
            },
        });
    }

    Ok(drafts)
}

/// How many occurrences of `rule`, expanded from `anchor`, fall in windows
/// before and after the window holding `pivot`. COUNT counts occurrences,
/// so splitting a multi-day weekly rule needs these rather than window
/// counts.
pub fn occurrences_around(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    pivot: NaiveDate,
    limit: u16,
) -> CompassResult<(usize, usize)> {
    let pivot = window(rule.cadence, pivot);
    let windows = occurrence_windows(rule, anchor, limit)?;
    let before = windows.iter().filter(|w| **w < pivot).count();
    let after = windows.iter().filter(|w| **w > pivot).count();
    Ok((before, after))
}

/// The window of every occurrence the rule engine yields, sorted, one entry
/// per occurrence.
fn occurrence_windows(
    rule: &RecurrenceRule,
    anchor: NaiveDate,
    limit: u16,
) -> CompassResult<Vec<(NaiveDate, NaiveDate)>> {
    let dtstart = next_anchor(rule.cadence, anchor);
    let rrule_set: RRuleSet = build_rrule_string(dtstart, rule)
        .parse()
        .map_err(|e| CompassError::UnsupportedRule(format!("{}: {}", rule.body(), e)))?;

    let mut windows: Vec<_> = rrule_set
        .all(limit)
        .dates
        .iter()
        .map(|occ| window(rule.cadence, occ.date_naive()))
        .collect();
    windows.sort();
    Ok(windows)
}

/// Build an iCalendar-format RRULE string for the rrule crate parser.
fn build_rrule_string(dtstart: NaiveDate, rule: &RecurrenceRule) -> String {
    // The rrule crate needs a datetime, so the anchor day becomes midnight UTC
    format!(
        "DTSTART:{}T000000Z\nRRULE:{}",
        dtstart.format("%Y%m%d"),
        rule.body()
    )
}

/// First instance anchor strictly after the base's window: the following
/// Sunday for weekly series, day 1 of the next month for monthly ones.
fn next_anchor(cadence: Cadence, anchor: NaiveDate) -> NaiveDate {
    match cadence {
        Cadence::Weekly => {
            let days_until_sunday = 7 - i64::from(anchor.weekday().num_days_from_sunday());
            anchor + Duration::days(days_until_sunday)
        }
        Cadence::Monthly => first_of_next_month(anchor),
    }
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // Day 1 exists in every month
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Inclusive first and last day of the window holding `occurrence`.
fn window(cadence: Cadence, occurrence: NaiveDate) -> (NaiveDate, NaiveDate) {
    match cadence {
        Cadence::Weekly => {
            let sunday =
                occurrence - Duration::days(i64::from(occurrence.weekday().num_days_from_sunday()));
            (sunday, sunday + Duration::days(6))
        }
        Cadence::Monthly => {
            let first = occurrence.with_day(1).unwrap_or(occurrence);
            (first, first_of_next_month(first) - Duration::days(1))
        }
    }
}

/// Render a window in the anchor's representation: inclusive dates for
/// all-day anchors, midnight-to-midnight in the anchor's offset otherwise.
fn window_times(
    first_day: NaiveDate,
    last_day: NaiveDate,
    like: &EventTime,
) -> CompassResult<(EventTime, EventTime)> {
    match like {
        EventTime::Date(_) => Ok((EventTime::Date(first_day), EventTime::Date(last_day))),
        EventTime::DateTime(dt) => {
            let offset = *dt.offset();
            let at_midnight = |day: NaiveDate| {
                day.and_time(NaiveTime::MIN)
                    .and_local_timezone(offset)
                    .single()
                    .map(EventTime::DateTime)
                    .ok_or_else(|| {
                        CompassError::InvalidEvent(
                            String::new(),
                            format!("cannot place {day} at offset {offset}"),
                        )
                    })
            };
            Ok((at_midnight(first_day)?, at_midnight(last_day + Duration::days(1))?))
        }
    }
}
