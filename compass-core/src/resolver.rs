//! Update-scope resolution.
//!
//! [`ScopeResolver::resolve`] turns one change request plus the stored state
//! of the series it touches into a [`WritePlan`]. It never performs I/O: the
//! processor loads the [`SeriesSnapshot`] under the series lock and applies
//! the plan afterwards.

use chrono::{DateTime, Utc};

use crate::category::{Category, SeriesRole, classify};
use crate::change::{ApplyTo, ChangeRequest, ChangeStatus};
use crate::error::{CompassError, CompassResult};
use crate::event::{Event, Recurrence};
use crate::filter::{Field, Filter, deletion_filter};
use crate::patch::EventPatch;
use crate::plan::{PlanItem, ProviderAction, WritePlan};
use crate::recurrence::{
    DEFAULT_MAX_INSTANCES, EventDraft, RecurrenceRule, expand_with_limit, occurrences_around,
};

/// Stored state relevant to one change request.
#[derive(Debug, Clone, Default)]
pub struct SeriesSnapshot {
    /// The stored row with the payload's id.
    pub existing: Option<Event>,
    /// Base of the series the row (or a new instance payload) belongs to.
    pub base: Option<Event>,
    /// Instance rows of that series, ordered by start date.
    pub instances: Vec<Event>,
}

impl SeriesSnapshot {
    /// Key serialising writes to one series, or to one standalone event.
    pub fn lock_key(&self, payload: &Event) -> String {
        let root = self
            .existing
            .as_ref()
            .and_then(Event::series_id)
            .or_else(|| payload.series_id())
            .unwrap_or(&payload.id);
        format!("{}:{}", payload.calendar_id, root)
    }
}

#[derive(Debug, Clone)]
pub struct ScopeResolver {
    max_instances: u16,
    /// Allow-list of calendar ids. Empty accepts any non-empty id.
    calendars: Vec<String>,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        ScopeResolver {
            max_instances: DEFAULT_MAX_INSTANCES,
            calendars: Vec::new(),
        }
    }
}

impl ScopeResolver {
    pub fn new(max_instances: u16, calendars: Vec<String>) -> Self {
        ScopeResolver {
            max_instances,
            calendars,
        }
    }

    /// Cap on instances materialised for rules without COUNT or UNTIL.
    pub fn max_instances(&self) -> u16 {
        self.max_instances
    }

    pub fn check_calendar(&self, calendar_id: &str) -> CompassResult<()> {
        if calendar_id.trim().is_empty() {
            return Err(CompassError::InvalidReference("empty calendar id".into()));
        }
        if !self.calendars.is_empty() && !self.calendars.iter().any(|c| c == calendar_id) {
            return Err(CompassError::InvalidReference(calendar_id.to_string()));
        }
        Ok(())
    }

    pub fn resolve(
        &self,
        change: &ChangeRequest,
        snapshot: &SeriesSnapshot,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let payload = &change.payload;
        self.check_calendar(&payload.calendar_id)?;

        if change.status == ChangeStatus::Cancelled {
            return resolve_delete(change.apply_to, snapshot);
        }

        payload.validate()?;
        if payload.has_ambiguous_recurrence() {
            return Err(CompassError::AmbiguousRecurrence(payload.id.clone()));
        }

        let plan = match &snapshot.existing {
            None => self.resolve_create(payload, snapshot, now)?,
            Some(existing) => match classify(existing).role() {
                SeriesRole::Standalone => self.resolve_standalone(change, existing, now)?,
                SeriesRole::Base | SeriesRole::Instance => {
                    self.resolve_series(change, existing, snapshot, now)?
                }
            },
        };

        tracing::debug!(
            event_id = %payload.id,
            apply_to = ?change.apply_to,
            writes = plan.items.len(),
            "resolved write plan"
        );
        Ok(plan)
    }

    fn resolve_create(
        &self,
        payload: &Event,
        snapshot: &SeriesSnapshot,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let category = classify(payload);
        match category.role() {
            SeriesRole::Standalone => {
                let mut event = stamp(payload.clone(), now);
                event.recurrence = None;
                if event.is_someday {
                    event.strip_provider_ids();
                }
                let provider = push_unless_someday(&event, false);
                Ok(WritePlan::new(vec![
                    PlanItem::create(event, category)
                        .reported()
                        .with_provider(provider),
                ]))
            }
            SeriesRole::Base => self.create_series(payload, now),
            SeriesRole::Instance => {
                let base = require_base(payload, snapshot)?;
                let mut event = stamp(payload.clone(), now);
                event.strip_provider_ids();
                event.is_someday = base.is_someday;
                let category = classify(&event);
                Ok(WritePlan::new(vec![PlanItem::create(event, category).reported()]))
            }
        }
    }

    /// New base plus its expanded instances. The expander assigns the base
    /// id; instances are written first so the base lands last.
    fn create_series(&self, payload: &Event, now: DateTime<Utc>) -> CompassResult<WritePlan> {
        let rule = RecurrenceRule::parse(payload.rule().unwrap_or_default())?;
        let mut drafts = expand_with_limit(
            &rule,
            &payload.start_date,
            &payload.end_date,
            None,
            self.max_instances,
        )?
        .into_iter();

        let base_draft = drafts
            .next()
            .ok_or_else(|| CompassError::UnsupportedRule(rule.to_lines().join("\n")))?;
        let base = stamp(base_draft.into_event(payload), now);

        let mut items = instance_items(drafts, &base, now);
        let category = classify(&base);
        let provider = push_unless_someday(&base, true);
        items.push(PlanItem::create(base, category).reported().with_provider(provider));
        Ok(WritePlan::new(items))
    }

    fn resolve_standalone(
        &self,
        change: &ChangeRequest,
        existing: &Event,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let payload = &change.payload;
        let from = classify(existing);

        if payload.rule().is_some() {
            return self.convert_to_series(payload, existing, from, now);
        }
        if change.apply_to != ApplyTo::ThisEvent {
            return Err(CompassError::NotASeries(existing.id.clone()));
        }

        let mut row = merge(existing, payload, now);
        row.recurrence = None;
        let to = classify(&row);
        let provider = if row.is_someday {
            ProviderAction::remove_all([existing])
        } else {
            ProviderAction::Push {
                link_instances: false,
            }
        };

        Ok(WritePlan::new(vec![
            PlanItem::update(row, from, to).reported().with_provider(provider),
        ]))
    }

    /// A standalone event gaining a rule becomes the base of a new series,
    /// keeping its id and provider linkage.
    fn convert_to_series(
        &self,
        payload: &Event,
        existing: &Event,
        from: Category,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let rule = RecurrenceRule::parse(payload.rule().unwrap_or_default())?;
        let mut base = merge(existing, payload, now);
        base.recurrence = Some(Recurrence {
            rule: Some(rule.to_lines()),
            event_id: Some(base.id.clone()),
        });

        let drafts = expand_with_limit(
            &rule,
            &base.start_date,
            &base.end_date,
            Some(&base.id),
            self.max_instances,
        )?;
        let mut items = instance_items(drafts, &base, now);

        let to = classify(&base);
        let provider = if base.is_someday {
            ProviderAction::remove_all([existing])
        } else {
            ProviderAction::Push {
                link_instances: true,
            }
        };
        items.push(PlanItem::update(base, from, to).reported().with_provider(provider));
        Ok(WritePlan::new(items))
    }

    fn resolve_series(
        &self,
        change: &ChangeRequest,
        existing: &Event,
        snapshot: &SeriesSnapshot,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let payload = &change.payload;
        let target_is_base = classify(existing).role() == SeriesRole::Base;

        let base = if target_is_base {
            existing
        } else {
            match snapshot.base.as_ref() {
                Some(base) => base,
                // An orphan can still be edited on its own
                None if change.apply_to == ApplyTo::ThisEvent
                    && !collapses(payload, false)
                    && payload.rule().is_none()
                    && payload.is_someday == existing.is_someday =>
                {
                    return Ok(update_instance(payload, existing, None, now));
                }
                None => return Err(orphaned(existing)),
            }
        };

        if collapses(payload, target_is_base) {
            return Ok(collapse(payload, base, snapshot, now));
        }
        if payload.is_someday != existing.is_someday {
            return Ok(flip_someday(payload, base, snapshot, now));
        }
        if target_is_base {
            return self.update_all(payload, base, snapshot, now, true);
        }

        match change.apply_to {
            ApplyTo::ThisEvent if payload.rule().is_none() => {
                Ok(update_instance(payload, existing, Some(base), now))
            }
            // Rule edits always reach the whole series
            ApplyTo::ThisEvent | ApplyTo::AllEvents => {
                self.update_all(payload, base, snapshot, now, false)
            }
            ApplyTo::ThisAndFollowingEvents => self.split(payload, existing, base, snapshot, now),
        }
    }

    /// Whole-series edit. Non-date fields cascade to every instance; dates
    /// only change on the base, and only when the base itself was edited.
    fn update_all(
        &self,
        payload: &Event,
        base: &Event,
        snapshot: &SeriesSnapshot,
        now: DateTime<Utc>,
        target_is_base: bool,
    ) -> CompassResult<WritePlan> {
        let patch = EventPatch::cascade_from(payload);
        let from = classify(base);
        let mut new_base = if target_is_base {
            merge(base, payload, now)
        } else {
            cascade(base, &patch, now)
        };

        let mut items = Vec::new();

        let new_rule = payload.rule().filter(|lines| Some(*lines) != base.rule());
        if let Some(lines) = new_rule {
            let rule = RecurrenceRule::parse(lines)?;
            new_base.recurrence = Some(Recurrence {
                rule: Some(rule.to_lines()),
                event_id: Some(base.id.clone()),
            });
            let drafts = expand_with_limit(
                &rule,
                &new_base.start_date,
                &new_base.end_date,
                Some(&base.id),
                self.max_instances,
            )?;

            items.push(
                PlanItem::delete(
                    Filter::series_instances(&base.calendar_id, &base.id),
                    base.title(),
                    from.instance_counterpart(),
                )
                .with_provider(ProviderAction::remove_all(&snapshot.instances)),
            );
            items.extend(instance_items(drafts, &new_base, now));
        } else {
            items.extend(snapshot.instances.iter().map(|instance| {
                let row = cascade(instance, &patch, now);
                let category = classify(&row);
                let provider = push_if_mirrored(&row);
                PlanItem::update(row, category, category).with_provider(provider)
            }));
        }

        let to = classify(&new_base);
        let provider = push_unless_someday(&new_base, new_rule.is_some());
        items.push(PlanItem::update(new_base, from, to).reported().with_provider(provider));
        Ok(WritePlan::new(items))
    }

    /// Split the series at `target`. Earlier instances stay with the old
    /// base, whose rule is truncated; `target` becomes the base of a new
    /// series holding the remainder.
    fn split(
        &self,
        payload: &Event,
        target: &Event,
        base: &Event,
        snapshot: &SeriesSnapshot,
        now: DateTime<Utc>,
    ) -> CompassResult<WritePlan> {
        let calendar_id = base.calendar_id.as_str();
        let position = snapshot
            .instances
            .iter()
            .position(|i| i.id == target.id)
            .ok_or_else(|| orphaned(target))?;
        let prior = &snapshot.instances[..position];
        let followers = &snapshot.instances[position + 1..];

        let base_rule = RecurrenceRule::parse(base.rule().unwrap_or_default())?;
        // COUNT counts rule occurrences, which can outnumber windows
        let (kept, remaining) = match base_rule.count() {
            Some(_) => occurrences_around(
                &base_rule,
                base.start_date.date(),
                target.start_date.date(),
                self.max_instances,
            )?,
            None => (prior.len(), followers.len()),
        };
        let new_rule = match payload.rule() {
            Some(lines) if Some(lines) != base.rule() => Some(RecurrenceRule::parse(lines)?),
            _ => None,
        };

        let mut items = Vec::new();

        let base_from = classify(base);
        let mut old_base = stamp(base.clone(), now);
        old_base.recurrence = if prior.is_empty() {
            // Nothing left before the split point
            None
        } else {
            let truncated = match base_rule.count() {
                Some(_) => base_rule.with_count(kept),
                None => base_rule.ending_before(target.start_date.date()),
            };
            Some(Recurrence {
                rule: Some(truncated.to_lines()),
                event_id: Some(base.id.clone()),
            })
        };
        let old_to = classify(&old_base);
        let provider = push_unless_someday(&old_base, false);
        items.push(PlanItem::update(old_base, base_from, old_to).with_provider(provider));

        let from = classify(target);
        let mut new_base = merge(target, payload, now);
        new_base.strip_provider_ids();
        let self_ref = |rule: &RecurrenceRule, id: &str| Recurrence {
            rule: Some(rule.to_lines()),
            event_id: Some(id.to_string()),
        };

        match new_rule {
            Some(rule) => {
                new_base.recurrence = Some(self_ref(&rule, &new_base.id));
                if !followers.is_empty() {
                    let ids = followers.iter().map(|f| f.id.as_str());
                    items.push(
                        PlanItem::delete(
                            Filter::And(vec![
                                Filter::calendar(calendar_id),
                                Filter::one_of(Field::Id, ids),
                            ]),
                            target.title(),
                            from,
                        )
                        .with_provider(ProviderAction::remove_all(followers)),
                    );
                }
                let drafts = expand_with_limit(
                    &rule,
                    &new_base.start_date,
                    &new_base.end_date,
                    Some(&new_base.id),
                    self.max_instances,
                )?;
                items.extend(instance_items(drafts, &new_base, now));
            }
            None if !followers.is_empty() => {
                let remainder = base_rule.remainder(remaining);
                new_base.recurrence = Some(self_ref(&remainder, &new_base.id));
                let patch = EventPatch::cascade_from(payload);
                items.extend(followers.iter().map(|follower| {
                    let mut row = cascade(follower, &patch, now);
                    row.recurrence = Some(Recurrence {
                        rule: None,
                        event_id: Some(new_base.id.clone()),
                    });
                    row.provider_recurring_event_id = None;
                    let (before, after) = (classify(follower), classify(&row));
                    PlanItem::update(row, before, after)
                }));
            }
            // The last occurrence leaves the series as a standalone event
            None => new_base.recurrence = None,
        }

        let to = classify(&new_base);
        let provider = push_unless_someday(&new_base, new_base.rule().is_some());
        items.push(PlanItem::update(new_base, from, to).reported().with_provider(provider));
        Ok(WritePlan::new(items))
    }
}

fn resolve_delete(scope: ApplyTo, snapshot: &SeriesSnapshot) -> CompassResult<WritePlan> {
    let Some(existing) = &snapshot.existing else {
        return Ok(WritePlan::default());
    };
    let category = classify(existing);
    let title = existing.title();

    let item = match (category.role(), scope) {
        (SeriesRole::Standalone, _) => {
            PlanItem::delete(deletion_filter(existing, ApplyTo::ThisEvent)?, title, category)
                .with_provider(ProviderAction::remove_all([existing]))
        }
        (SeriesRole::Instance, ApplyTo::ThisEvent) => {
            let provider = match &snapshot.base {
                Some(base) => ProviderAction::cancel_occurrences([existing], base),
                None => ProviderAction::remove_all([existing]),
            };
            PlanItem::delete(deletion_filter(existing, ApplyTo::ThisEvent)?, title, category)
                .with_provider(provider)
        }
        (SeriesRole::Base, _) => {
            PlanItem::delete(deletion_filter(existing, ApplyTo::AllEvents)?, title, category)
                .with_provider(ProviderAction::remove_all(series_rows(existing, snapshot)))
        }
        (SeriesRole::Instance, ApplyTo::ThisAndFollowingEvents) => {
            let base = require_base(existing, snapshot)?;
            let filter = deletion_filter(existing, scope)?;
            let removed = snapshot.instances.iter().filter(|e| filter.matches(e)).collect::<Vec<_>>();
            PlanItem::delete(filter, title, category)
                .with_provider(ProviderAction::cancel_occurrences(removed, base))
        }
        (SeriesRole::Instance, ApplyTo::AllEvents) => {
            let base = require_base(existing, snapshot)?;
            PlanItem::delete(deletion_filter(existing, scope)?, base.title(), classify(base))
                .with_provider(ProviderAction::remove_all(series_rows(base, snapshot)))
        }
    };

    Ok(WritePlan::new(vec![item.reported()]))
}

/// Only this instance row changes; its series linkage stays. On the
/// provider the row becomes an exception of the base's series.
fn update_instance(
    payload: &Event,
    existing: &Event,
    base: Option<&Event>,
    now: DateTime<Utc>,
) -> WritePlan {
    let mut row = merge(existing, payload, now);
    let series = base.and_then(|b| b.provider_event_id.clone());
    if series.is_some() && !row.is_someday {
        row.provider_recurring_event_id = series;
    }
    let category = classify(&row);
    let provider = if !row.is_someday
        && (row.provider_event_id.is_some() || row.provider_recurring_event_id.is_some())
    {
        ProviderAction::Push {
            link_instances: false,
        }
    } else {
        ProviderAction::Skip
    };
    WritePlan::new(vec![
        PlanItem::update(row, category, category)
            .reported()
            .with_provider(provider),
    ])
}

/// The series becomes one standalone event at the base's id.
fn collapse(
    payload: &Event,
    base: &Event,
    snapshot: &SeriesSnapshot,
    now: DateTime<Utc>,
) -> WritePlan {
    let from = classify(base);
    let mut row = merge(base, payload, now);
    row.recurrence = None;
    row.provider_recurring_event_id = None;
    let to = classify(&row);

    let provider = if row.is_someday {
        ProviderAction::remove_all([base])
    } else {
        ProviderAction::Push {
            link_instances: false,
        }
    };

    WritePlan::new(vec![
        PlanItem::delete(
            Filter::series_instances(&base.calendar_id, &base.id),
            base.title(),
            from.instance_counterpart(),
        )
        .with_provider(ProviderAction::remove_all(&snapshot.instances)),
        PlanItem::update(row, from, to).reported().with_provider(provider),
    ])
}

/// Move every row of the series in or out of someday. Linkage is kept;
/// provider ids are dropped on the way in and re-created on the way out.
fn flip_someday(
    payload: &Event,
    base: &Event,
    snapshot: &SeriesSnapshot,
    now: DateTime<Utc>,
) -> WritePlan {
    let someday = payload.is_someday;
    let mut patch = EventPatch::cascade_from(payload);
    patch.is_someday = Some(someday);
    if someday {
        patch.provider_event_id = Some(None);
        patch.provider_recurring_event_id = Some(None);
    }

    let mut items: Vec<PlanItem> = snapshot
        .instances
        .iter()
        .map(|instance| {
            let row = cascade(instance, &patch, now);
            let (before, after) = (classify(instance), classify(&row));
            PlanItem::update(row, before, after)
        })
        .collect();

    let from = classify(base);
    let new_base = cascade(base, &patch, now);
    let to = classify(&new_base);
    let provider = if someday {
        ProviderAction::remove_all(series_rows(base, snapshot))
    } else {
        ProviderAction::Push {
            link_instances: true,
        }
    };
    items.push(PlanItem::update(new_base, from, to).reported().with_provider(provider));
    WritePlan::new(items)
}

fn instance_items(
    drafts: impl IntoIterator<Item = EventDraft>,
    base: &Event,
    now: DateTime<Utc>,
) -> Vec<PlanItem> {
    drafts
        .into_iter()
        .map(|draft| {
            let event = stamp(draft.into_event(base), now);
            let category = classify(&event);
            PlanItem::create(event, category)
        })
        .collect()
}

/// Payload fields over the stored row. Identity, linkage and provider ids
/// come from the store; someday rows never keep provider ids.
fn merge(existing: &Event, payload: &Event, now: DateTime<Utc>) -> Event {
    let mut row = payload.clone();
    row.id = existing.id.clone();
    row.calendar_id = existing.calendar_id.clone();
    row.recurrence = existing.recurrence.clone();
    row.provider_event_id = existing.provider_event_id.clone();
    row.provider_recurring_event_id = existing.provider_recurring_event_id.clone();
    if row.is_someday {
        row.strip_provider_ids();
    }
    stamp(row, now)
}

fn cascade(row: &Event, patch: &EventPatch, now: DateTime<Utc>) -> Event {
    let mut row = row.clone();
    patch.apply(&mut row);
    stamp(row, now)
}

fn stamp(mut event: Event, now: DateTime<Utc>) -> Event {
    event.updated_at = Some(now);
    event
}

/// A base payload without a rule, or an emptied recurrence
/// (`{rule: null, eventId: null}`) on any series row, dissolves the series.
/// Instance payloads never carry a rule, so only the emptied form counts
/// for them.
fn collapses(payload: &Event, target_is_base: bool) -> bool {
    let emptied = matches!(
        &payload.recurrence,
        Some(Recurrence {
            rule: None,
            event_id: None
        })
    );
    emptied || (target_is_base && payload.rule().is_none())
}

fn series_rows<'a>(
    base: &'a Event,
    snapshot: &'a SeriesSnapshot,
) -> impl Iterator<Item = &'a Event> {
    std::iter::once(base).chain(snapshot.instances.iter())
}

fn require_base<'a>(instance: &Event, snapshot: &'a SeriesSnapshot) -> CompassResult<&'a Event> {
    snapshot.base.as_ref().ok_or_else(|| orphaned(instance))
}

fn orphaned(instance: &Event) -> CompassError {
    CompassError::OrphanedInstance {
        instance_id: instance.id.clone(),
        base_id: instance.recurrence_event_id().unwrap_or_default().to_string(),
    }
}

fn push_unless_someday(event: &Event, link_instances: bool) -> ProviderAction {
    if event.is_someday {
        ProviderAction::Skip
    } else {
        ProviderAction::Push { link_instances }
    }
}

/// Instances are mirrored through their base unless the provider tracks
/// them individually.
fn push_if_mirrored(row: &Event) -> ProviderAction {
    if row.provider_event_id.is_some() && !row.is_someday {
        ProviderAction::Push {
            link_instances: false,
        }
    } else {
        ProviderAction::Skip
    }
}
