//! In-memory event store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Documents, EventStore, StoreWrite};
use crate::error::{CompassError, CompassResult};
use crate::event::Event;
use crate::filter::Filter;
use crate::patch::EventPatch;

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        MemoryStore {
            docs: Mutex::new(events),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every following write fail with a store error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every stored row, in insertion order.
    pub async fn all(&self) -> Vec<Event> {
        self.docs.lock().await.clone()
    }

    fn check_writable(&self) -> CompassResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CompassError::Store("store is unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find(&self, filter: &Filter) -> CompassResult<Vec<Event>> {
        Ok(Documents::find(&self.docs.lock().await, filter))
    }

    async fn update_one(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<bool> {
        self.check_writable()?;
        Ok(Documents::update(&mut self.docs.lock().await, filter, patch, Some(1)) == 1)
    }

    async fn update_many(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<usize> {
        self.check_writable()?;
        Ok(Documents::update(&mut self.docs.lock().await, filter, patch, None))
    }

    async fn delete_one(&self, filter: &Filter) -> CompassResult<bool> {
        self.check_writable()?;
        Ok(Documents::delete(&mut *self.docs.lock().await, filter, Some(1)) == 1)
    }

    async fn delete_many(&self, filter: &Filter) -> CompassResult<usize> {
        self.check_writable()?;
        Ok(Documents::delete(&mut *self.docs.lock().await, filter, None))
    }

    async fn commit(&self, writes: Vec<StoreWrite>) -> CompassResult<()> {
        self.check_writable()?;
        let mut docs = self.docs.lock().await;
        let mut next = docs.clone();
        Documents::apply(&mut next, writes)?;
        *docs = next;
        Ok(())
    }
}
