//! Provider to local reconciliation.

use chrono::Utc;
use serde::Serialize;

use super::locks::SeriesGuard;
use super::{LOCK_ATTEMPTS, SyncProcessor};
use crate::category::{SeriesRole, classify};
use crate::change::ApplyTo;
use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult, ErrorKind};
use crate::event::{Event, Recurrence};
use crate::filter::{Filter, deletion_filter};
use crate::patch::EventPatch;
use crate::provider::{PROP_COMPASS_ID, ProviderEvent, ProviderStatus, ProviderSync};
use crate::recurrence::{RecurrenceRule, expand_with_limit};
use crate::store::StoreWrite;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl ImportReport {
    pub fn is_empty(&self) -> bool {
        *self == ImportReport::default()
    }
}

enum Imported {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

impl SyncProcessor {
    /// Bring provider-side changes in `range` into the store.
    ///
    /// Cancelled provider events delete their local rows. Bases are imported
    /// before instances so instances can be attached to their local series.
    /// Rows that changed locally after the provider's copy are left alone.
    pub async fn pull_from_provider(
        &self,
        calendar_id: &str,
        range: &DateRange,
    ) -> CompassResult<ImportReport> {
        self.resolver.check_calendar(calendar_id)?;
        let sync = self
            .provider
            .as_ref()
            .ok_or_else(|| CompassError::Config("no provider configured".into()))?;

        let mut listed = sync.list(calendar_id, range).await?;
        listed.sort_by_key(|e| e.recurrence.is_empty());

        let mut report = ImportReport::default();
        for wire in listed {
            let _guard = self.lock_provider_event(calendar_id, &wire).await?;

            if wire.status == ProviderStatus::Cancelled {
                report.deleted += self.import_cancellation(calendar_id, &wire.id).await?;
                continue;
            }

            match self.import_event(sync, calendar_id, wire).await? {
                Imported::Created => report.created += 1,
                Imported::Updated => report.updated += 1,
                Imported::Unchanged => {}
                Imported::Skipped => report.skipped += 1,
            }
        }

        tracing::info!(
            calendar_id,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            "pulled provider events"
        );
        Ok(report)
    }

    /// Take the lock of the local series `wire` touches, the same key local
    /// changes to that series take.
    async fn lock_provider_event(
        &self,
        calendar_id: &str,
        wire: &ProviderEvent,
    ) -> CompassResult<SeriesGuard<'_>> {
        let mut key = self.provider_lock_key(calendar_id, wire).await?;

        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.acquire(&key).await;
            let current = self.provider_lock_key(calendar_id, wire).await?;
            if current == key {
                return Ok(guard);
            }
            tracing::debug!(from = %key, to = %current, "series root moved, relocking");
            key = current;
        }

        Err(CompassError::Store(format!(
            "series of provider event '{}' kept changing while locking",
            wire.id
        )))
    }

    async fn provider_lock_key(&self, calendar_id: &str, wire: &ProviderEvent) -> CompassResult<String> {
        let compass_id = wire.private_property(PROP_COMPASS_ID);

        let local = match self
            .store
            .find_one(&Filter::by_provider_id(calendar_id, &wire.id))
            .await?
        {
            Some(found) => Some(found),
            None => match compass_id {
                Some(id) => self.store.find_one(&Filter::by_id(calendar_id, id)).await?,
                None => None,
            },
        };

        let root = match (local, wire.recurring_event_id.as_deref()) {
            (Some(local), _) => local.series_id().unwrap_or(&local.id).to_string(),
            (None, Some(series)) => self
                .store
                .find_one(&Filter::by_provider_id(calendar_id, series))
                .await?
                .map_or_else(|| format!("provider:{series}"), |base| base.id),
            (None, None) => compass_id.map_or_else(|| format!("provider:{}", wire.id), String::from),
        };
        Ok(format!("{calendar_id}:{root}"))
    }

    async fn import_cancellation(&self, calendar_id: &str, provider_id: &str) -> CompassResult<usize> {
        let Some(local) = self
            .store
            .find_one(&Filter::by_provider_id(calendar_id, provider_id))
            .await?
        else {
            return Ok(0);
        };

        let filter = match classify(&local).role() {
            SeriesRole::Base => deletion_filter(&local, ApplyTo::AllEvents)?,
            _ => Filter::by_id(calendar_id, &local.id),
        };
        self.store.delete_many(&filter).await
    }

    async fn import_event(
        &self,
        sync: &ProviderSync,
        calendar_id: &str,
        wire: ProviderEvent,
    ) -> CompassResult<Imported> {
        let provider_id = wire.id.clone();
        let mut draft = match sync.pull(calendar_id, wire) {
            Ok(Some(draft)) => draft,
            Ok(None) => return Ok(Imported::Unchanged),
            Err(e) if e.kind() == ErrorKind::Validation => {
                tracing::warn!(provider_event_id = %provider_id, error = %e, "skipping provider event");
                return Ok(Imported::Skipped);
            }
            Err(e) => return Err(e),
        };

        // Instances arrive pointing at the provider's series id
        let mut local_base = None;
        let series = draft
            .rule()
            .is_none()
            .then(|| draft.provider_recurring_event_id.clone())
            .flatten();
        if let Some(series) = series {
            let Some(base) = self
                .store
                .find_one(&Filter::by_provider_id(calendar_id, &series))
                .await?
            else {
                tracing::warn!(
                    provider_event_id = %provider_id,
                    provider_series_id = %series,
                    "skipping instance of unknown series"
                );
                return Ok(Imported::Skipped);
            };
            draft.recurrence = Some(Recurrence {
                rule: None,
                event_id: Some(base.id.clone()),
            });
            local_base = Some(base);
        }

        let existing = self.find_local(calendar_id, &provider_id, &draft, local_base.as_ref()).await?;

        match existing {
            Some(existing) if existing.is_someday => Ok(Imported::Skipped),
            Some(existing) => self.import_update(existing, draft).await,
            None => self.import_create(draft).await,
        }
    }

    /// The local row a provider event corresponds to: by provider id, then
    /// by the compass id it carries, then (for instances) the unlinked local
    /// instance whose window holds it.
    async fn find_local(
        &self,
        calendar_id: &str,
        provider_id: &str,
        draft: &Event,
        local_base: Option<&Event>,
    ) -> CompassResult<Option<Event>> {
        if let Some(found) = self
            .store
            .find_one(&Filter::by_provider_id(calendar_id, provider_id))
            .await?
        {
            return Ok(Some(found));
        }
        if let Some(found) = self
            .store
            .find_one(&Filter::by_id(calendar_id, &draft.id))
            .await?
        {
            return Ok(Some(found));
        }
        let Some(base) = local_base else {
            return Ok(None);
        };

        let start = draft.start_date.instant();
        let instances = self
            .store
            .find(&Filter::series_instances(calendar_id, &base.id))
            .await?;
        Ok(instances.into_iter().find(|i| {
            i.provider_event_id.is_none()
                && i.start_date.instant() <= start
                && start <= i.end_date.instant()
        }))
    }

    async fn import_update(&self, existing: Event, mut draft: Event) -> CompassResult<Imported> {
        let local_is_newer = matches!(
            (existing.updated_at, draft.updated_at),
            (Some(local), Some(remote)) if local > remote
        );
        if local_is_newer {
            tracing::debug!(event_id = %existing.id, "local copy is newer, keeping it");
            return Ok(Imported::Unchanged);
        }

        draft.id = existing.id.clone();
        if draft.rule().is_some() {
            draft.recurrence = Some(Recurrence {
                rule: draft.rule().map(<[String]>::to_vec),
                event_id: Some(existing.id.clone()),
            });
        }

        if same_content(&existing, &draft) {
            return Ok(Imported::Unchanged);
        }

        let now = Utc::now();
        draft.updated_at = Some(now);
        let mut writes = Vec::new();

        if draft.rule().is_some() && draft.rule() != existing.rule() {
            // A changed rule re-materialises the local instances
            match self.expand_instances(&draft) {
                Ok(instances) => {
                    writes.push(StoreWrite::Delete(Filter::series_instances(
                        &existing.calendar_id,
                        &existing.id,
                    )));
                    writes.extend(instances.into_iter().map(StoreWrite::Insert));
                }
                Err(e) => {
                    tracing::warn!(event_id = %existing.id, error = %e, "skipping provider rule change");
                    return Ok(Imported::Skipped);
                }
            }
        } else if draft.rule().is_some() {
            // Instances without their own provider copy follow the base
            let patch = EventPatch::cascade_from(&draft).with_updated_at(now);
            let instances = self
                .store
                .find(&Filter::series_instances(&existing.calendar_id, &existing.id))
                .await?;
            writes.extend(
                instances
                    .into_iter()
                    .filter(|i| i.provider_event_id.is_none() && !i.is_someday)
                    .map(|mut i| {
                        patch.apply(&mut i);
                        StoreWrite::Replace(i)
                    }),
            );
        }

        writes.push(StoreWrite::Replace(draft));
        self.store.commit(writes).await?;
        Ok(Imported::Updated)
    }

    async fn import_create(&self, mut draft: Event) -> CompassResult<Imported> {
        draft.updated_at = Some(Utc::now());
        let mut writes = Vec::new();

        if draft.rule().is_some() {
            match self.expand_instances(&draft) {
                Ok(instances) => writes.extend(instances.into_iter().map(StoreWrite::Insert)),
                Err(e) => {
                    tracing::warn!(event_id = %draft.id, error = %e, "skipping provider series");
                    return Ok(Imported::Skipped);
                }
            }
        }

        writes.push(StoreWrite::Insert(draft));
        self.store.commit(writes).await?;
        Ok(Imported::Created)
    }

    /// Local instances of a pulled base, linked to its provider series.
    fn expand_instances(&self, base: &Event) -> CompassResult<Vec<Event>> {
        let rule = RecurrenceRule::parse(base.rule().unwrap_or_default())?;
        let drafts = expand_with_limit(
            &rule,
            &base.start_date,
            &base.end_date,
            Some(&base.id),
            self.resolver.max_instances(),
        )?;
        Ok(drafts
            .into_iter()
            .map(|d| {
                let mut instance = d.into_event(base);
                instance.provider_recurring_event_id = base.provider_event_id.clone();
                instance.updated_at = base.updated_at;
                instance
            })
            .collect())
    }
}

/// Equal apart from the write timestamp.
fn same_content(a: &Event, b: &Event) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.updated_at = None;
    b.updated_at = None;
    a == b
}
