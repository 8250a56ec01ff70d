//! JSON-file event store.
//!
//! The whole collection lives in one `events.json` document under the data
//! directory. Every write loads, applies and rewrites it through a temp file
//! so a crash never leaves a half-written collection behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Documents, EventStore, StoreWrite};
use crate::error::CompassResult;
use crate::event::Event;
use crate::filter::Filter;
use crate::patch::EventPatch;

const EVENTS_FILE: &str = "events.json";

pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        FileStore {
            path: data_dir.join(EVENTS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CompassResult<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, docs: &[Event]) -> CompassResult<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let temp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(docs)?;

        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// Load, mutate and save under the store lock.
    async fn modify<T>(&self, f: impl FnOnce(&mut Vec<Event>) -> CompassResult<T>) -> CompassResult<T> {
        let _guard = self.lock.lock().await;
        let mut docs = self.load().await?;
        let out = f(&mut docs)?;
        self.save(&docs).await?;
        Ok(out)
    }
}

#[async_trait]
impl EventStore for FileStore {
    async fn find(&self, filter: &Filter) -> CompassResult<Vec<Event>> {
        let _guard = self.lock.lock().await;
        Ok(Documents::find(&self.load().await?, filter))
    }

    async fn update_one(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<bool> {
        self.modify(|docs| Ok(Documents::update(docs, filter, patch, Some(1)) == 1))
            .await
    }

    async fn update_many(&self, filter: &Filter, patch: &EventPatch) -> CompassResult<usize> {
        self.modify(|docs| Ok(Documents::update(docs, filter, patch, None)))
            .await
    }

    async fn delete_one(&self, filter: &Filter) -> CompassResult<bool> {
        self.modify(|docs| Ok(Documents::delete(docs, filter, Some(1)) == 1))
            .await
    }

    async fn delete_many(&self, filter: &Filter) -> CompassResult<usize> {
        self.modify(|docs| Ok(Documents::delete(docs, filter, None)))
            .await
    }

    async fn commit(&self, writes: Vec<StoreWrite>) -> CompassResult<()> {
        // A failed apply returns before save, so the file keeps its old state
        self.modify(|docs| Documents::apply(docs, writes)).await
    }
}
