//! In-process provider used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult};
use crate::provider::{ProviderClient, ProviderEvent, ProviderStatus};

type Key = (String, String);

#[derive(Default)]
pub struct MemoryProvider {
    events: Mutex<BTreeMap<Key, ProviderEvent>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a provider error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Store `event` as-is, assigning an id when it has none.
    pub async fn seed(&self, calendar_id: &str, mut event: ProviderEvent) -> String {
        if event.id.is_empty() {
            event.id = self.allocate_id();
        }
        let id = event.id.clone();
        self.events
            .lock()
            .await
            .insert((calendar_id.to_string(), id.clone()), event);
        id
    }

    /// Mark an event cancelled, as providers report deletions in listings.
    pub async fn cancel(&self, calendar_id: &str, event_id: &str) -> bool {
        let mut events = self.events.lock().await;
        match events.get_mut(&(calendar_id.to_string(), event_id.to_string())) {
            Some(event) => {
                event.status = ProviderStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, calendar_id: &str, event_id: &str) -> Option<ProviderEvent> {
        self.events
            .lock()
            .await
            .get(&(calendar_id.to_string(), event_id.to_string()))
            .cloned()
    }

    /// Every event of a calendar, cancelled ones included.
    pub async fn events(&self, calendar_id: &str) -> Vec<ProviderEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|((cal, _), _)| cal == calendar_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn allocate_id(&self) -> String {
        format!("prov-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn enter(&self) -> CompassResult<()> {
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CompassError::ProviderSync("provider is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for MemoryProvider {
    async fn insert(&self, calendar_id: &str, event: &ProviderEvent) -> CompassResult<ProviderEvent> {
        self.enter().await?;
        let mut stored = event.clone();
        stored.id = self.allocate_id();
        stored.updated = Some(Utc::now());
        self.events
            .lock()
            .await
            .insert((calendar_id.to_string(), stored.id.clone()), stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &ProviderEvent,
    ) -> CompassResult<ProviderEvent> {
        self.enter().await?;
        let mut events = self.events.lock().await;
        let slot = events
            .get_mut(&(calendar_id.to_string(), event_id.to_string()))
            .filter(|e| e.status != ProviderStatus::Cancelled)
            .ok_or_else(|| CompassError::ProviderGone(event_id.to_string()))?;

        *slot = ProviderEvent {
            id: event_id.to_string(),
            updated: Some(Utc::now()),
            ..event.clone()
        };
        Ok(slot.clone())
    }

    async fn delete(&self, calendar_id: &str, event_id: &str) -> CompassResult<()> {
        self.enter().await?;
        self.events
            .lock()
            .await
            .remove(&(calendar_id.to_string(), event_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| CompassError::ProviderGone(event_id.to_string()))
    }

    async fn list(&self, calendar_id: &str, range: &DateRange) -> CompassResult<Vec<ProviderEvent>> {
        self.enter().await?;
        let listed = self
            .events(calendar_id)
            .await
            .into_iter()
            .filter(|e| match (e.start.to_event_time(), e.end.to_event_time()) {
                (Some(start), Some(end)) => range.overlaps(&start, &end),
                _ => false,
            })
            .collect();
        Ok(listed)
    }
}
