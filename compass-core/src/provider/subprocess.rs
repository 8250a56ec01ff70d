//! Provider client backed by an external binary.
//!
//! A provider named `google` is the executable `compass-provider-google`
//! found on `PATH`. Each call spawns it, writes one [`Request`] line to
//! stdin and reads one [`Response`] from stdout. Providers manage their own
//! credentials.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;

use crate::date_range::DateRange;
use crate::error::{CompassError, CompassResult};
use crate::provider::protocol::{
    Command, DeleteEvent, InsertEvent, ListEvents, ProviderCommand, Request, Response,
    UpdateEvent,
};
use crate::provider::{ProviderClient, ProviderEvent};

#[derive(Clone, Debug)]
pub struct SubprocessProvider {
    name: String,
}

impl SubprocessProvider {
    pub fn from_name(name: &str) -> Self {
        SubprocessProvider {
            name: name.to_string(),
        }
    }

    pub fn binary_name(&self) -> String {
        format!("compass-provider-{}", self.name)
    }

    fn binary_path(&self) -> CompassResult<PathBuf> {
        let binary_name = self.binary_name();
        which::which(&binary_name).map_err(|_| CompassError::ProviderNotInstalled(binary_name))
    }

    /// Call a typed provider command. `target` names the event the command
    /// acts on, for error reporting.
    async fn call<C: ProviderCommand>(&self, cmd: C, target: &str) -> CompassResult<C::Response> {
        self.call_raw(C::command(), cmd, target).await
    }

    async fn call_raw<P: Serialize, R: DeserializeOwned>(
        &self,
        command: Command,
        params: P,
        target: &str,
    ) -> CompassResult<R> {
        let params = serde_json::to_value(params)?;
        let request_json = serde_json::to_string(&Request { command, params })?;

        let binary_path = self.binary_path()?;

        let mut child = TokioCommand::new(&binary_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            // Dropped on timeout
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CompassError::ProviderSync(format!(
                    "Failed to spawn {}: {}",
                    binary_path.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CompassError::ProviderSync("Provider stdin unavailable".into()))?;
        stdin
            .write_all(format!("{request_json}\n").as_bytes())
            .await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(CompassError::ProviderSync(format!(
                "Provider exited with status: {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        Response::<R>::decode(&String::from_utf8_lossy(&output.stdout), target)
    }
}

#[async_trait]
impl ProviderClient for SubprocessProvider {
    async fn insert(&self, calendar_id: &str, event: &ProviderEvent) -> CompassResult<ProviderEvent> {
        self.call(
            InsertEvent {
                calendar_id: calendar_id.to_string(),
                event: event.clone(),
            },
            "",
        )
        .await
    }

    async fn update(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &ProviderEvent,
    ) -> CompassResult<ProviderEvent> {
        self.call(
            UpdateEvent {
                calendar_id: calendar_id.to_string(),
                event_id: event_id.to_string(),
                event: event.clone(),
            },
            event_id,
        )
        .await
    }

    async fn delete(&self, calendar_id: &str, event_id: &str) -> CompassResult<()> {
        self.call(
            DeleteEvent {
                calendar_id: calendar_id.to_string(),
                event_id: event_id.to_string(),
            },
            event_id,
        )
        .await
    }

    async fn list(&self, calendar_id: &str, range: &DateRange) -> CompassResult<Vec<ProviderEvent>> {
        self.call(
            ListEvents {
                calendar_id: calendar_id.to_string(),
                from: range.from_rfc3339(),
                to: range.to_rfc3339(),
            },
            "",
        )
        .await
    }
}
