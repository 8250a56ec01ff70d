//! Provider sync adapter: the single caller of the provider API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult};
use crate::event::Event;
use crate::provider::{
    FromProvider, ProviderClient, ProviderEvent, ProviderRef, ProviderStatus, ToProvider,
};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ProviderSync {
    client: Arc<dyn ProviderClient>,
    timeout: Duration,
}

impl ProviderSync {
    pub fn new(client: Arc<dyn ProviderClient>, timeout: Duration) -> Self {
        ProviderSync { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mirror a local event. Updates when it already has a provider id
    /// (re-inserting if the provider lost it), inserts otherwise.
    pub async fn push(&self, event: &Event) -> CompassResult<ProviderRef> {
        if event.is_someday {
            return Err(CompassError::SomedayNotMirrored(event.id.clone()));
        }

        let stored = self.send(event, event.to_provider()).await?;
        tracing::debug!(event_id = %event.id, provider_event_id = %stored.id, "pushed event");

        Ok(ProviderRef {
            calendar_id: event.calendar_id.clone(),
            event_id: stored.id,
            recurring_event_id: stored.recurring_event_id,
        })
    }

    /// Cancel one occurrence of a provider series. The instance is written
    /// as a cancelled exception pointing at its series, so listings of the
    /// series stop yielding it.
    pub async fn cancel(&self, instance: &Event) -> CompassResult<()> {
        if instance.is_someday {
            return Err(CompassError::SomedayNotMirrored(instance.id.clone()));
        }

        let mut wire = instance.to_provider();
        wire.status = ProviderStatus::Cancelled;
        let stored = self.send(instance, wire).await?;
        tracing::debug!(
            event_id = %instance.id,
            provider_event_id = %stored.id,
            provider_series_id = ?stored.recurring_event_id,
            "cancelled occurrence"
        );
        Ok(())
    }

    async fn send(&self, event: &Event, wire: ProviderEvent) -> CompassResult<ProviderEvent> {
        let calendar_id = event.calendar_id.as_str();
        let Some(provider_id) = event.provider_event_id.as_deref() else {
            return self.bounded(self.client.insert(calendar_id, &wire)).await;
        };

        match self
            .bounded(self.client.update(calendar_id, provider_id, &wire))
            .await
        {
            Err(CompassError::ProviderGone(_)) => {
                tracing::warn!(
                    event_id = %event.id,
                    provider_event_id = provider_id,
                    "provider lost event, re-inserting"
                );
                self.bounded(self.client.insert(calendar_id, &wire)).await
            }
            other => other,
        }
    }

    /// Map a provider event onto a local draft. Cancelled events yield
    /// `None`; events that are both base and instance are rejected.
    pub fn pull(&self, calendar_id: &str, event: ProviderEvent) -> CompassResult<Option<Event>> {
        if event.status == ProviderStatus::Cancelled {
            return Ok(None);
        }
        Event::from_provider(calendar_id, event).map(Some)
    }

    /// Delete a mirrored event. An event the provider no longer has counts
    /// as deleted.
    pub async fn remove(&self, target: &ProviderRef) -> CompassResult<()> {
        match self
            .bounded(self.client.delete(&target.calendar_id, &target.event_id))
            .await
        {
            Ok(()) => Ok(()),
            Err(CompassError::ProviderGone(id)) => {
                tracing::info!(provider_event_id = %id, "provider event already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, calendar_id: &str, range: &DateRange) -> CompassResult<Vec<ProviderEvent>> {
        self.bounded(self.client.list(calendar_id, range)).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = CompassResult<T>>) -> CompassResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CompassError::ProviderTimeout(self.timeout.as_secs()))?
    }
}
