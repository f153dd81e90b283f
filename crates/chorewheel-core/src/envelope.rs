//! # Realtime Event Envelope
//!
//! The structured unit carried over every realtime transport.
//!
//! ## Wire Format
//! ```json
//! { "type": "chore.completed", "data": { "chore": { "id": 7 } }, "timestamp": 1718000000000 }
//! ```
//!
//! ## Known Types
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Envelope Types                                   │
//! │                                                                         │
//! │  MUTATIONS                                                             │
//! │  ─────────                                                             │
//! │  <resource>.created | updated | completed | skipped | deleted          │
//! │  <subresource>.updated | completed                                     │
//! │                                                                         │
//! │  CHANNEL                                                               │
//! │  ───────                                                               │
//! │  heartbeat               server liveness signal                        │
//! │  connection.established  synthesised locally on open                  │
//! │  error                   server-reported problem                       │
//! │                                                                         │
//! │  Anything else is UNKNOWN and passes through to diagnostics only.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

/// Envelope type for server liveness pings.
pub const HEARTBEAT: &str = "heartbeat";

/// Envelope type synthesised by the client when a transport opens.
pub const CONNECTION_ESTABLISHED: &str = "connection.established";

/// Envelope type for server-reported errors.
pub const ERROR: &str = "error";

// =============================================================================
// Envelope
// =============================================================================

/// One message received from the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type, e.g. `chore.completed`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload. Always a JSON object once parsed.
    #[serde(default = "empty_object", deserialize_with = "object_or_null")]
    pub data: Value,

    /// Server timestamp in milliseconds since the Unix epoch.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "millis"
    )]
    pub timestamp: Option<i64>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn object_or_null<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(empty_object()),
        obj @ Value::Object(_) => Ok(obj),
        other => Err(serde::de::Error::custom(format!(
            "expected object for 'data', got {}",
            json_kind(&other)
        ))),
    }
}

// Servers written in JS sometimes emit fractional milliseconds.
fn millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected number for 'timestamp', got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl EventEnvelope {
    /// Creates an envelope with the given type and payload.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        EventEnvelope {
            event_type: event_type.into(),
            data,
            timestamp: None,
        }
    }

    /// The synthetic envelope dispatched when a transport opens.
    pub fn connection_established() -> Self {
        Self::new(CONNECTION_ESTABLISHED, empty_object())
    }

    /// Parses a raw transport payload.
    ///
    /// Rejects non-JSON text, non-object payloads and an empty `type`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let envelope: EventEnvelope = serde_json::from_str(raw)?;
        if envelope.event_type.trim().is_empty() {
            return Err(CoreError::MissingField("type"));
        }
        Ok(envelope)
    }

    /// Classifies the envelope type.
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// Returns true for server heartbeats.
    pub fn is_heartbeat(&self) -> bool {
        self.event_type == HEARTBEAT
    }

    /// Server timestamp as a UTC datetime, if present and representable.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

// =============================================================================
// Event Kind
// =============================================================================

/// Mutation verbs carried in `<entity>.<action>` envelope types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Created,
    Updated,
    Completed,
    Skipped,
    Deleted,
}

impl MutationAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(MutationAction::Created),
            "updated" => Some(MutationAction::Updated),
            "completed" => Some(MutationAction::Completed),
            "skipped" => Some(MutationAction::Skipped),
            "deleted" => Some(MutationAction::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for MutationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationAction::Created => write!(f, "created"),
            MutationAction::Updated => write!(f, "updated"),
            MutationAction::Completed => write!(f, "completed"),
            MutationAction::Skipped => write!(f, "skipped"),
            MutationAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// Syntactic classification of an envelope type.
///
/// Whether a `Mutation` entity is a known resource is decided later by the
/// [`EventDispatcher`](crate::dispatch::EventDispatcher) registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `<entity>.<action>` with a recognised action.
    Mutation {
        entity: String,
        action: MutationAction,
    },
    Heartbeat,
    ConnectionEstablished,
    Error,
    /// Anything else; kept verbatim for diagnostics.
    Unknown(String),
}

impl EventKind {
    /// Classifies a raw `type` string.
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            HEARTBEAT => return EventKind::Heartbeat,
            CONNECTION_ESTABLISHED => return EventKind::ConnectionEstablished,
            ERROR => return EventKind::Error,
            _ => {}
        }

        match event_type.rsplit_once('.') {
            Some((entity, action)) if !entity.is_empty() => match MutationAction::parse(action) {
                Some(action) => EventKind::Mutation {
                    entity: entity.to_string(),
                    action,
                },
                None => EventKind::Unknown(event_type.to_string()),
            },
            _ => EventKind::Unknown(event_type.to_string()),
        }
    }
}
