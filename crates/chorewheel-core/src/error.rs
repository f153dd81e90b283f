//! # Error Types
//!
//! Errors raised while interpreting data received from the realtime channel.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  chorewheel-core errors (this file)                                    │
//! │  └── CoreError        - Envelope could not be interpreted              │
//! │                                                                         │
//! │  chorewheel-realtime errors (separate crate)                           │
//! │  └── RealtimeError    - Transport, breaker, credential, config         │
//! │                                                                         │
//! │  Flow: CoreError ──► RealtimeError::Parse ──► diagnostics only         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced while parsing or validating an event envelope.
///
/// None of these are fatal to a connection: the channel records them in its
/// diagnostics and keeps listening.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Payload was not a JSON object of the expected shape.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A required envelope field was absent or empty.
    #[error("Envelope is missing required field '{0}'")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedEnvelope(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingField("type");
        assert_eq!(err.to_string(), "Envelope is missing required field 'type'");
    }

    #[test]
    fn test_from_serde_error() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, CoreError::MalformedEnvelope(_)));
    }
}
