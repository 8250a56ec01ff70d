#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use compass_core::event::{Event, EventTime, Origin, Priority, Recurrence};
use compass_core::filter::Filter;
use compass_core::provider::{MemoryProvider, ProviderSync};
use compass_core::store::{EventStore, MemoryStore};
use compass_core::{ApplyTo, ChangeRequest, ScopeResolver, SyncProcessor};

pub const CAL: &str = "primary";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MemoryProvider>,
    pub processor: SyncProcessor,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemoryProvider::new());
        let processor = SyncProcessor::new(store.clone(), ScopeResolver::default())
            .with_provider(ProviderSync::new(provider.clone(), Duration::from_secs(5)));
        Harness {
            store,
            provider,
            processor,
        }
    }

    /// Create a weekly series and return its stored base.
    pub async fn create_weekly(&self, count: u32) -> Event {
        let change = ChangeRequest::confirmed(weekly_draft(count), ApplyTo::ThisEvent);
        self.processor.process_change(&change).await.unwrap();
        self.bases().await.remove(0)
    }

    pub async fn bases(&self) -> Vec<Event> {
        self.store
            .find(&Filter::calendar(CAL))
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.rule().is_some())
            .collect()
    }

    pub async fn instances(&self, base: &Event) -> Vec<Event> {
        self.store
            .find(&Filter::series_instances(CAL, &base.id))
            .await
            .unwrap()
    }

    pub async fn rows(&self) -> Vec<Event> {
        self.store.find(&Filter::calendar(CAL)).await.unwrap()
    }
}

pub fn event(id: &str, title: &str, start: &str, end: &str) -> Event {
    let start_date = EventTime::parse(start).unwrap();
    Event {
        id: id.into(),
        calendar_id: CAL.into(),
        title: Some(title.into()),
        description: None,
        is_all_day: start_date.is_date(),
        start_date,
        end_date: EventTime::parse(end).unwrap(),
        is_someday: false,
        priority: Priority::Work,
        recurrence: None,
        origin: Origin::CompassNative,
        provider_event_id: None,
        provider_recurring_event_id: None,
        updated_at: None,
    }
}

pub fn weekly_rule(count: u32) -> Vec<String> {
    vec![format!("RRULE:FREQ=WEEKLY;COUNT={count}")]
}

/// A new weekly series anchored on the week of 2025-01-05.
pub fn weekly_draft(count: u32) -> Event {
    let mut draft = event("draft", "Standup", "2025-01-05", "2025-01-11");
    draft.recurrence = Some(Recurrence {
        rule: Some(weekly_rule(count)),
        event_id: None,
    });
    draft
}
