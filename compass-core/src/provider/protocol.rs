//! JSON protocol spoken with provider binaries over stdin/stdout.
//!
//! One request line in, one response document out:
//!
//! ```json
//! {"command": "insert_event", "params": {"calendar_id": "...", "event": {...}}}
//! {"status": "success", "data": {...}}
//! {"status": "error", "error": "not found", "code": "gone"}
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{CompassError, CompassResult};
use crate::provider::ProviderEvent;

/// Error code a provider returns when the target event no longer exists.
pub const CODE_GONE: &str = "gone";

pub trait ProviderCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ListEvents,
    InsertEvent,
    UpdateEvent,
    DeleteEvent,
}

/// Request sent to a provider binary.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response sent back by a provider binary.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success {
        data: T,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl<T: DeserializeOwned> Response<T> {
    /// Parse a raw response and unwrap it into the command's result.
    /// `target` names the event an error refers to.
    pub fn decode(raw: &str, target: &str) -> CompassResult<T> {
        if raw.trim().is_empty() {
            return Err(CompassError::ProviderSync(
                "Provider returned no response".into(),
            ));
        }

        let response: Response<T> = serde_json::from_str(raw).map_err(|e| {
            CompassError::ProviderSync(format!("Failed to parse response: {}", e))
        })?;

        match response {
            Response::Success { data } => Ok(data),
            Response::Error { code, .. } if code.as_deref() == Some(CODE_GONE) => {
                Err(CompassError::ProviderGone(target.to_string()))
            }
            Response::Error { error, .. } => Err(CompassError::ProviderSync(error)),
        }
    }
}

/// List events overlapping a time range.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEvents {
    pub calendar_id: String,
    pub from: String,
    pub to: String,
}

impl ProviderCommand for ListEvents {
    type Response = Vec<ProviderEvent>;
    fn command() -> Command {
        Command::ListEvents
    }
}

/// Create a new event.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertEvent {
    pub calendar_id: String,
    pub event: ProviderEvent,
}

impl ProviderCommand for InsertEvent {
    type Response = ProviderEvent;
    fn command() -> Command {
        Command::InsertEvent
    }
}

/// Replace an existing event.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub calendar_id: String,
    pub event_id: String,
    pub event: ProviderEvent,
}

impl ProviderCommand for UpdateEvent {
    type Response = ProviderEvent;
    fn command() -> Command {
        Command::UpdateEvent
    }
}

/// Delete an event by provider id.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub calendar_id: String,
    pub event_id: String,
}

impl ProviderCommand for DeleteEvent {
    type Response = ();
    fn command() -> Command {
        Command::DeleteEvent
    }
}
