//! Sync processor: the orchestrator and the only writer of events.
//!
//! For each change request: load the series snapshot under the series lock,
//! resolve a write plan, commit it to the store in one unit, then mirror the
//! written rows to the provider. Provider failures never undo a commit; they
//! come back as warnings on the change summary.

mod locks;
mod pull;

pub use pull::ImportReport;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::category::Category;
use crate::change::ChangeRequest;
use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult};
use crate::event::Event;
use crate::filter::{self, Filter};
use crate::patch::EventPatch;
use crate::plan::{Operation, PlanItem, ProviderAction, Transition, WritePlan};
use crate::provider::ProviderSync;
use crate::resolver::{ScopeResolver, SeriesSnapshot};
use crate::store::EventStore;

use locks::{SeriesGuard, SeriesLocks};

/// Attempts at pinning a series whose root moves between reads.
const LOCK_ATTEMPTS: usize = 3;

/// Outcome of one reported plan item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    pub title: String,
    pub transition: Transition,
    pub category: Category,
    pub operation: Operation,
    /// Provider mirroring failures. The store write stands regardless.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ChangeSummary {
    fn from_item(item: &PlanItem, warnings: &[String]) -> Self {
        ChangeSummary {
            title: item.title.clone(),
            transition: item.transition,
            category: item.category,
            operation: item.operation(),
            warnings: warnings.to_vec(),
        }
    }
}

#[derive(Clone)]
pub struct SyncProcessor {
    store: Arc<dyn EventStore>,
    provider: Option<ProviderSync>,
    resolver: ScopeResolver,
    locks: Arc<SeriesLocks>,
}

impl SyncProcessor {
    /// A processor that keeps events local until a provider is attached.
    pub fn new(store: Arc<dyn EventStore>, resolver: ScopeResolver) -> Self {
        SyncProcessor {
            store,
            provider: None,
            resolver,
            locks: Arc::new(SeriesLocks::default()),
        }
    }

    pub fn with_provider(mut self, provider: ProviderSync) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Apply a batch in order. A rejected item is logged and skipped; its
    /// siblings still run.
    pub async fn process_events(&self, changes: Vec<ChangeRequest>) -> Vec<ChangeSummary> {
        self.process_batch(&changes)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .flatten()
            .collect()
    }

    /// Apply a batch in order, keeping each item's outcome.
    pub async fn process_batch(
        &self,
        changes: &[ChangeRequest],
    ) -> Vec<CompassResult<Vec<ChangeSummary>>> {
        let mut results = Vec::with_capacity(changes.len());
        for (index, change) in changes.iter().enumerate() {
            let result = self.process_change(change).await;
            if let Err(e) = &result {
                tracing::error!(
                    index,
                    event_id = %change.payload.id,
                    kind = ?e.kind(),
                    error = %e,
                    "change rejected"
                );
            }
            results.push(result);
        }
        results
    }

    pub async fn process_change(&self, change: &ChangeRequest) -> CompassResult<Vec<ChangeSummary>> {
        let payload = &change.payload;
        self.resolver.check_calendar(&payload.calendar_id)?;

        let (snapshot, _guard) = self.lock_series(payload).await?;
        let plan = self.resolver.resolve(change, &snapshot, Utc::now())?;

        if plan.is_empty() {
            tracing::info!(event_id = %payload.id, status = change.status.label(), "nothing to change");
            return Ok(Vec::new());
        }

        self.store.commit(plan.store_writes()).await?;
        let warnings = self.mirror(&plan).await;

        let summaries: Vec<ChangeSummary> = plan
            .reported()
            .map(|item| ChangeSummary::from_item(item, &warnings))
            .collect();
        for summary in &summaries {
            tracing::info!(
                operation = %summary.operation,
                title = %summary.title,
                writes = plan.items.len(),
                warnings = summary.warnings.len(),
                "applied change"
            );
        }
        Ok(summaries)
    }

    /// Events of one calendar in `range`, scheduled or someday.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        range: &DateRange,
        someday: bool,
    ) -> CompassResult<Vec<Event>> {
        self.resolver.check_calendar(calendar_id)?;
        self.store
            .find(&filter::window(calendar_id, range, someday))
            .await
    }

    /// Lock the series `payload` belongs to and read it. The root is read
    /// again under the lock; when a concurrent split or collapse moved it,
    /// the new root is locked instead.
    async fn lock_series(&self, payload: &Event) -> CompassResult<(SeriesSnapshot, SeriesGuard<'_>)> {
        let mut key = self.load_snapshot(payload).await?.lock_key(payload);

        for _ in 0..LOCK_ATTEMPTS {
            let guard = self.locks.acquire(&key).await;
            let snapshot = self.load_snapshot(payload).await?;
            let current = snapshot.lock_key(payload);
            if current == key {
                return Ok((snapshot, guard));
            }
            tracing::debug!(from = %key, to = %current, "series root moved, relocking");
            key = current;
        }

        Err(CompassError::Store(format!(
            "series of event '{}' kept changing while locking",
            payload.id
        )))
    }

    async fn load_snapshot(&self, payload: &Event) -> CompassResult<SeriesSnapshot> {
        let calendar_id = payload.calendar_id.as_str();
        let existing = self
            .store
            .find_one(&Filter::by_id(calendar_id, &payload.id))
            .await?;

        let series_id = existing
            .as_ref()
            .and_then(Event::series_id)
            .or_else(|| payload.recurrence_event_id().filter(|id| *id != payload.id))
            .map(String::from);

        let Some(series_id) = series_id else {
            return Ok(SeriesSnapshot {
                existing,
                ..Default::default()
            });
        };

        let base = self
            .store
            .find_one(&Filter::by_id(calendar_id, &series_id))
            .await?
            .filter(|b| b.rule().is_some());
        let instances = self
            .store
            .find(&Filter::series_instances(calendar_id, &series_id))
            .await?;

        Ok(SeriesSnapshot {
            existing,
            base,
            instances,
        })
    }

    /// Run the plan's provider actions. Returns one warning per failure.
    async fn mirror(&self, plan: &WritePlan) -> Vec<String> {
        let Some(sync) = &self.provider else {
            return Vec::new();
        };

        let mut warnings = Vec::new();
        for item in &plan.items {
            match &item.provider {
                ProviderAction::Skip => {}
                ProviderAction::Push { link_instances } => {
                    let Some(event) = item.event() else { continue };
                    if let Err(e) = self.push(sync, event, *link_instances).await {
                        tracing::warn!(event_id = %event.id, error = %e, "provider push failed");
                        warnings.push(format!("push of '{}' failed: {e}", event.id));
                    }
                }
                ProviderAction::Remove(targets) => {
                    for target in targets {
                        if let Err(e) = sync.remove(target).await {
                            tracing::warn!(
                                provider_event_id = %target.event_id,
                                error = %e,
                                "provider delete failed"
                            );
                            warnings.push(format!("delete of '{}' failed: {e}", target.event_id));
                        }
                    }
                }
                ProviderAction::Cancel(instances) => {
                    for instance in instances {
                        if let Err(e) = sync.cancel(instance).await {
                            tracing::warn!(event_id = %instance.id, error = %e, "provider cancel failed");
                            warnings.push(format!("cancel of '{}' failed: {e}", instance.id));
                        }
                    }
                }
            }
        }
        warnings
    }

    /// Push one row and record the provider ids it was given.
    async fn push(&self, sync: &ProviderSync, event: &Event, link_instances: bool) -> CompassResult<()> {
        let pushed = sync.push(event).await?;
        let calendar_id = event.calendar_id.as_str();

        self.store
            .update_one(
                &Filter::by_id(calendar_id, &event.id),
                &EventPatch::provider_ids(Some(pushed.event_id.clone()), pushed.recurring_event_id),
            )
            .await?;

        if link_instances {
            let linked = self
                .store
                .update_many(
                    &Filter::series_instances(calendar_id, &event.id),
                    &EventPatch::recurring_event_id(Some(pushed.event_id)),
                )
                .await?;
            tracing::debug!(event_id = %event.id, linked, "linked instances to provider series");
        }
        Ok(())
    }
}
