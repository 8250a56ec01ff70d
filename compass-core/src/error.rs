//! Error types for the compass sync engine.

use thiserror::Error;

/// Errors that can occur while resolving, applying or mirroring event changes.
#[derive(Error, Debug)]
pub enum CompassError {
    #[error("Invalid calendar reference: {0}")]
    InvalidReference(String),

    #[error("Event '{0}' has a recurrence but no recurrence event id")]
    MissingRecurrenceId(String),

    #[error("Unsupported recurrence rule: {0}")]
    UnsupportedRule(String),

    #[error("Event '{0}' is not part of a recurring series")]
    NotASeries(String),

    #[error("Instance '{instance_id}' references missing base '{base_id}'")]
    OrphanedInstance { instance_id: String, base_id: String },

    #[error("Event '{0}' carries both a recurrence rule and a foreign recurrence event id")]
    AmbiguousRecurrence(String),

    #[error("Invalid event '{0}': {1}")]
    InvalidEvent(String, String),

    #[error("Someday event '{0}' cannot be mirrored to the provider")]
    SomedayNotMirrored(String),

    #[error("Provider error: {0}")]
    ProviderSync(String),

    #[error("Provider event '{0}' is already gone")]
    ProviderGone(String),

    #[error("Provider request timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Provider '{0}' not found in PATH")]
    ProviderNotInstalled(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse grouping used to decide whether a failure aborts a change or is
/// reported as a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Nothing was written.
    Validation,
    /// The store already disagrees with the request. Nothing was written.
    Consistency,
    /// Provider mirroring failed after the local write.
    Provider,
    /// Store, filesystem or configuration trouble.
    Infrastructure,
}

impl CompassError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompassError::InvalidReference(_)
            | CompassError::MissingRecurrenceId(_)
            | CompassError::UnsupportedRule(_)
            | CompassError::AmbiguousRecurrence(_)
            | CompassError::InvalidEvent(..)
            | CompassError::SomedayNotMirrored(_) => ErrorKind::Validation,
            CompassError::NotASeries(_) | CompassError::OrphanedInstance { .. } => {
                ErrorKind::Consistency
            }
            CompassError::ProviderSync(_)
            | CompassError::ProviderGone(_)
            | CompassError::ProviderTimeout(_)
            | CompassError::ProviderNotInstalled(_) => ErrorKind::Provider,
            CompassError::Store(_)
            | CompassError::Config(_)
            | CompassError::Io(_)
            | CompassError::Serialization(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<serde_json::Error> for CompassError {
    fn from(e: serde_json::Error) -> Self {
        CompassError::Serialization(e.to_string())
    }
}

/// Result type alias for compass operations.
pub type CompassResult<T> = Result<T, CompassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_abort_and_warn_failures() {
        assert_eq!(
            CompassError::InvalidReference("e1".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CompassError::OrphanedInstance {
                instance_id: "i1".into(),
                base_id: "b1".into(),
            }
            .kind(),
            ErrorKind::Consistency
        );
        assert_eq!(CompassError::ProviderTimeout(10).kind(), ErrorKind::Provider);
        assert_eq!(
            CompassError::Store("disk full".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_serde_errors_become_serialization() {
        let err: CompassError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CompassError::Serialization(_)));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
