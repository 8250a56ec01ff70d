//! Inbound change requests.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// How far across a series a change reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApplyTo {
    #[default]
    #[serde(rename = "This Event")]
    ThisEvent,
    #[serde(rename = "This and Following Events")]
    ThisAndFollowingEvents,
    #[serde(rename = "All Events")]
    AllEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Confirmed,
    /// Deletion semantics.
    Cancelled,
}

impl ChangeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeStatus::Confirmed => "CONFIRMED",
            ChangeStatus::Cancelled => "CANCELLED",
        }
    }
}

/// One item of a `process_events` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub payload: Event,
    #[serde(default)]
    pub apply_to: ApplyTo,
    #[serde(default)]
    pub status: ChangeStatus,
}

impl ChangeRequest {
    pub fn confirmed(payload: Event, apply_to: ApplyTo) -> Self {
        ChangeRequest {
            payload,
            apply_to,
            status: ChangeStatus::Confirmed,
        }
    }

    pub fn cancelled(payload: Event, apply_to: ApplyTo) -> Self {
        ChangeRequest {
            payload,
            apply_to,
            status: ChangeStatus::Cancelled,
        }
    }
}
