//! Per-series mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async locks keyed by series root. Entries are dropped once no change
/// holds or waits on them.
#[derive(Default)]
pub(crate) struct SeriesLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

pub(crate) struct SeriesGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a SeriesLocks,
}

impl SeriesLocks {
    pub(crate) async fn acquire(&self, key: &str) -> SeriesGuard<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        // The map shard must not stay borrowed across the await
        let guard = lock.lock_owned().await;
        SeriesGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for SeriesGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still holds an unused lock
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialised() {
        let locks = Arc::new(SeriesLocks::default());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = locks.acquire("cal:base").await;
        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("cal:base").await;
                order.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(first);
        waiter.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = SeriesLocks::default();
        let _a = locks.acquire("cal:a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("cal:b")).await;
        assert!(b.is_ok());
    }
}
