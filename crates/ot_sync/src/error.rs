//! Error types for the synchronization engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type OtResult<T> = Result<T, OtError>;

/// Errors that can occur while composing, transforming, applying or
/// synchronizing operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// Two operations could not be composed: their overlapping content
    /// disagrees or one outlasts the other. Indicates the operations were not
    /// derived from a common document state.
    #[error("Compose error: {0}")]
    Compose(String),

    /// Two concurrent operations could not be transformed against each other.
    #[error("Transform error: {0}")]
    Transform(String),

    /// An operation does not fit the value it was applied to.
    #[error("Apply error: {0}")]
    Apply(String),

    /// The transform queue was driven out of sequence.
    #[error("Queue invariant violated: {0}")]
    QueueInvariant(String),

    /// The channel was used in a state that does not allow the call.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The network layer reported a failure.
    #[error("Transport error: {message}")]
    Transport { message: String, fatal: bool },

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(String),
}

impl OtError {
    /// Create a recoverable transport error (the channel will back off and resync).
    pub fn transport(message: impl Into<String>) -> Self {
        OtError::Transport {
            message: message.into(),
            fatal: false,
        }
    }

    /// Create a document-fatal transport error, e.g. an authorization failure.
    pub fn fatal_transport(message: impl Into<String>) -> Self {
        OtError::Transport {
            message: message.into(),
            fatal: true,
        }
    }

    /// Whether the error ends the editing session.
    ///
    /// Only non-fatal transport errors are recoverable; everything else means
    /// local state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        match self {
            OtError::Transport { fatal, .. } => *fatal,
            _ => true,
        }
    }
}

impl From<std::io::Error> for OtError {
    fn from(e: std::io::Error) -> Self {
        OtError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for OtError {
    fn from(e: serde_json::Error) -> Self {
        OtError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        assert!(!OtError::transport("socket closed").is_fatal());
        assert!(OtError::fatal_transport("forbidden").is_fatal());
        assert!(OtError::Compose("mismatch".into()).is_fatal());
        assert!(OtError::QueueInvariant("empty".into()).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = OtError::transport("socket closed");
        assert_eq!(err.to_string(), "Transport error: socket closed");

        let err = OtError::Transform("stale index".into());
        assert_eq!(err.to_string(), "Transform error: stale index");
    }
}
