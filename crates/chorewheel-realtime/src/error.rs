//! # Realtime Error Types
//!
//! Error types for the realtime channel.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Realtime Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Channel       │  │     Gate                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  TransportOpen  │  │  CircuitOpen            │ │
//! │  │  InvalidUrl     │  │  Transient      │  │  Precondition           │ │
//! │  │  ConfigLoad/Save│  │  PermanentAuth  │  │                         │ │
//! │  │                 │  │  Parse          │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  PROPAGATION                                                           │
//! │  ───────────                                                           │
//! │  Parse          → diagnostics only, channel stays open                 │
//! │  TransportOpen  → status message, retried with backoff                 │
//! │  Transient      → status message, retried with backoff                 │
//! │  PermanentAuth  → status message, NOT retried (re-authenticate)        │
//! │  CircuitOpen    → returned to caller, NOT retried until cooldown       │
//! │  Precondition   → silent no-op, retried on next external trigger       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Every failure the realtime channel can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid channel configuration.
    #[error("Invalid realtime configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint could not be turned into a transport URL.
    #[error("Invalid realtime endpoint: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Channel Errors
    // =========================================================================
    /// Handshake or network failure while opening the transport.
    #[error("Failed to open realtime transport: {0}")]
    TransportOpen(String),

    /// Received payload was not a valid envelope.
    #[error("Malformed realtime message: {0}")]
    Parse(String),

    /// The server closed the channel for a reason re-authentication must fix.
    #[error("Realtime channel rejected credentials (close code {code}): {reason}")]
    PermanentAuth { code: u16, reason: String },

    /// Close or error without a permanent signal.
    #[error("Realtime connection lost: {0}")]
    Transient(String),

    // =========================================================================
    // Gate Errors
    // =========================================================================
    /// Too many consecutive failures; connection attempts are suspended.
    #[error("Realtime circuit breaker is open; retrying in {}s", retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    /// Feature disabled, credentials missing/invalid, or attempts exhausted.
    #[error("Realtime connection not attempted: {0}")]
    Precondition(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The channel task is gone.
    #[error("Realtime channel task stopped")]
    ChannelClosed,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<chorewheel_core::CoreError> for RealtimeError {
    fn from(err: chorewheel_core::CoreError) -> Self {
        RealtimeError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for RealtimeError {
    fn from(err: url::ParseError) -> Self {
        RealtimeError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                RealtimeError::Transient("socket closed".into())
            }
            WsError::Io(io) => RealtimeError::TransportOpen(io.to_string()),
            WsError::Tls(tls) => RealtimeError::TransportOpen(tls.to_string()),
            WsError::Http(response) => {
                RealtimeError::TransportOpen(format!("handshake rejected: {}", response.status()))
            }
            other => RealtimeError::Transient(other.to_string()),
        }
    }
}

impl From<reqwest_eventsource::Error> for RealtimeError {
    fn from(err: reqwest_eventsource::Error) -> Self {
        use reqwest_eventsource::Error as EsError;
        match err {
            EsError::Transport(e) => RealtimeError::TransportOpen(e.to_string()),
            EsError::InvalidStatusCode(status, _) => {
                RealtimeError::TransportOpen(format!("unexpected status {}", status))
            }
            EsError::InvalidContentType(_, _) => {
                RealtimeError::TransportOpen("server did not answer with an event stream".into())
            }
            EsError::StreamEnded => RealtimeError::Transient("event stream ended".into()),
            other => RealtimeError::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RealtimeError {
    fn from(err: std::io::Error) -> Self {
        RealtimeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for RealtimeError {
    fn from(err: toml::de::Error) -> Self {
        RealtimeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for RealtimeError {
    fn from(err: toml::ser::Error) -> Self {
        RealtimeError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl RealtimeError {
    /// Returns true if the channel retries this failure on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RealtimeError::TransportOpen(_) | RealtimeError::Transient(_)
        )
    }

    /// Returns true if the consumer has to act (re-authenticate or wait out
    /// the breaker) before the channel can recover.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            RealtimeError::PermanentAuth { .. } | RealtimeError::CircuitOpen { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RealtimeError::InvalidConfig(_)
                | RealtimeError::InvalidUrl(_)
                | RealtimeError::ConfigLoadFailed(_)
                | RealtimeError::ConfigSaveFailed(_)
        )
    }

    /// Short machine-readable label used in status snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeError::InvalidConfig(_) => "invalid_config",
            RealtimeError::InvalidUrl(_) => "invalid_url",
            RealtimeError::ConfigLoadFailed(_) => "config_load_failed",
            RealtimeError::ConfigSaveFailed(_) => "config_save_failed",
            RealtimeError::TransportOpen(_) => "transport_open",
            RealtimeError::Parse(_) => "parse",
            RealtimeError::PermanentAuth { .. } => "permanent_auth",
            RealtimeError::Transient(_) => "transient",
            RealtimeError::CircuitOpen { .. } => "circuit_open",
            RealtimeError::Precondition(_) => "precondition",
            RealtimeError::ChannelClosed => "channel_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RealtimeError::TransportOpen("refused".into()).is_retryable());
        assert!(RealtimeError::Transient("reset".into()).is_retryable());

        assert!(!RealtimeError::PermanentAuth {
            code: 4001,
            reason: "expired".into()
        }
        .is_retryable());
        assert!(!RealtimeError::Parse("bad".into()).is_retryable());
        assert!(!RealtimeError::CircuitOpen {
            retry_after: Duration::from_secs(300)
        }
        .is_retryable());
    }

    #[test]
    fn test_actionable_errors() {
        assert!(RealtimeError::PermanentAuth {
            code: 4003,
            reason: "forbidden".into()
        }
        .is_actionable());
        assert!(RealtimeError::CircuitOpen {
            retry_after: Duration::ZERO
        }
        .is_actionable());
        assert!(!RealtimeError::Precondition("disabled".into()).is_actionable());
        assert!(!RealtimeError::Transient("reset".into()).is_actionable());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::CircuitOpen {
            retry_after: Duration::from_secs(120),
        };
        assert!(err.to_string().contains("120s"));

        let err = RealtimeError::PermanentAuth {
            code: 4001,
            reason: "token expired".into(),
        };
        assert!(err.to_string().contains("4001"));
        assert_eq!(err.kind(), "permanent_auth");
    }

    #[test]
    fn test_core_error_becomes_parse() {
        let err: RealtimeError = chorewheel_core::CoreError::MissingField("type").into();
        assert!(matches!(err, RealtimeError::Parse(_)));
    }
}
