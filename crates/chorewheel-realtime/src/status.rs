//! Consumer-facing status and diagnostics snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::circuit::CircuitBreakerState;
use crate::config::TransportKind;
use crate::error::RealtimeError;

/// Channel connection state. Owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
        }
    }
}

/// Most recent envelope the channel handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastEvent {
    pub kind: String,
    pub at: DateTime<Utc>,
}

/// Most recent failure, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusError {
    pub fn from_error(error: &RealtimeError) -> Self {
        StatusError {
            kind: error.kind().to_string(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }

    /// Error text reported by the server in an `error` envelope.
    pub fn server(message: impl Into<String>) -> Self {
        StatusError {
            kind: "server".to_string(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Status snapshot for a UI or debug view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub last_event: Option<LastEvent>,
    pub last_error: Option<StatusError>,
    pub circuit_open: bool,
    pub enabled: bool,
}

impl ChannelStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Operational counters for a debug view.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub transport: TransportKind,
    pub attempts: u32,
    pub circuit: CircuitBreakerState,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub reconnect_pending: bool,
    /// Last liveness signal of the current open connection.
    pub last_seen_at: Option<Instant>,
    /// Last `heartbeat` envelope, kept across reconnects.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub last_parse_error: Option<String>,
    pub unknown_events: u64,
    pub last_unknown_event: Option<String>,
}

impl Diagnostics {
    /// Time since the open channel last showed signs of life. `None` unless Open.
    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_seen_at.map(|seen| seen.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ChannelStatus {
            state: ConnectionState::Open,
            circuit_open: false,
            enabled: true,
            last_error: Some(StatusError::server("maintenance")),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["state"], "open");
        assert_eq!(json["circuitOpen"], false);
        assert_eq!(json["lastError"]["kind"], "server");
        assert_eq!(json["lastError"]["message"], "maintenance");
        assert!(json["lastEvent"].is_null());
    }

    #[test]
    fn test_status_error_from_channel_error() {
        let error = StatusError::from_error(&RealtimeError::PermanentAuth {
            code: 4001,
            reason: "expired".into(),
        });
        assert_eq!(error.kind, "permanent_auth");
        assert!(error.message.contains("4001"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_age() {
        let diagnostics = Diagnostics {
            last_seen_at: Some(Instant::now()),
            ..Default::default()
        };
        tokio::time::advance(Duration::from_secs(42)).await;
        assert_eq!(diagnostics.heartbeat_age(), Some(Duration::from_secs(42)));
        assert!(Diagnostics::default().heartbeat_age().is_none());
    }
}
