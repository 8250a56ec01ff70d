//! Document store collaborator.
//!
//! The sync processor is the only writer. Stores only need filtered reads,
//! `$set` updates, deletes and an all-or-nothing [`EventStore::commit`].

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::{CompassError, CompassResult};
use crate::event::Event;
use crate::filter::Filter;
use crate::patch::EventPatch;

/// One write of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Insert(Event),
    /// Replace the stored row with the same id.
    Replace(Event),
    Delete(Filter),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Matching rows, ordered by start date.
    async fn find(&self, filter: &Filter) -> CompassResult<Vec<Event>>;

    async fn find_one(&self, filter: &Filter) -> CompassResult<Option<Event>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    async fn insert_one(&self, event: Event) -> CompassResult<()> {
        self.commit(vec![StoreWrite::Insert(event)]).await
    }

    async fn insert_many(&self, events: Vec<Event>) -> CompassResult<()> {
        self.commit(events.into_iter().map(StoreWrite::Insert).collect())
            .await
    }

    /// Apply `patch` to the first matching row. Returns whether one matched.
    async fn update_one(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<bool>;

    /// Apply `patch` to every matching row. Returns the number matched.
    async fn update_many(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<usize>;

    async fn delete_one(&self, filter: &Filter) -> CompassResult<bool>;

    async fn delete_many(&self, filter: &Filter) -> CompassResult<usize>;

    /// Apply every write or none of them.
    async fn commit(&self, writes: Vec<StoreWrite>) -> CompassResult<()>;
}

/// In-process document operations shared by the bundled stores.
pub(crate) struct Documents;

impl Documents {
    pub(crate) fn find(docs: &[Event], filter: &Filter) -> Vec<Event> {
        let mut found: Vec<Event> = docs.iter().filter(|e| filter.matches(e)).cloned().collect();
        found.sort_by_key(|e| e.start_date.instant());
        found
    }

    pub(crate) fn update(
        docs: &mut [Event],
        filter: &Filter,
        patch: &EventPatch,
        limit: Option<usize>,
    ) -> usize {
        docs.iter_mut()
            .filter(|e| filter.matches(e))
            .take(limit.unwrap_or(usize::MAX))
            .map(|e| patch.apply(e))
            .count()
    }

    pub(crate) fn delete(docs: &mut Vec<Event>, filter: &Filter, limit: Option<usize>) -> usize {
        let mut remaining = limit.unwrap_or(usize::MAX);
        let before = docs.len();
        docs.retain(|e| {
            if remaining > 0 && filter.matches(e) {
                remaining -= 1;
                false
            } else {
                true
            }
        });
        before - docs.len()
    }

    /// Apply `writes` in order. On error `docs` may be partially written, so
    /// callers work on a copy.
    pub(crate) fn apply(docs: &mut Vec<Event>, writes: Vec<StoreWrite>) -> CompassResult<()> {
        for write in writes {
            match write {
                StoreWrite::Insert(event) => {
                    if docs.iter().any(|e| e.id == event.id) {
                        return Err(CompassError::Store(format!(
                            "duplicate key: event '{}' already exists",
                            event.id
                        )));
                    }
                    docs.push(event);
                }
                StoreWrite::Replace(event) => {
                    let slot = docs.iter_mut().find(|e| e.id == event.id).ok_or_else(|| {
                        CompassError::Store(format!("no event '{}' to replace", event.id))
                    })?;
                    *slot = event;
                }
                StoreWrite::Delete(filter) => {
                    Documents::delete(docs, &filter, None);
                }
            }
        }
        Ok(())
    }
}
