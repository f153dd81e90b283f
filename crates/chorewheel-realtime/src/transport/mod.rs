//! # Transport Adapters
//!
//! The supervisor drives one state machine over two interchangeable wire
//! transports.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Transport Adapter Contract                        │
//! │                                                                         │
//! │   supervisor ── open(target, events) ──► adapter                        │
//! │       ▲                                    │ spawns I/O task            │
//! │       │                                    ▼                            │
//! │       │        TransportEvents ◄──── Opened                             │
//! │       └──────── (tagged with   ◄──── Message(text)   (0..n)             │
//! │                 ConnectionId)  ◄──── Failed | Closed (exactly one)      │
//! │                                                                         │
//! │   supervisor ── close() ───────────► connection (emits nothing after)   │
//! │                                                                         │
//! │   ┌────────────────────────┐        ┌────────────────────────────┐     │
//! │   │  PushStreamTransport   │        │   DuplexSocketTransport    │     │
//! │   │  SSE over reqwest      │        │   WebSocket (tungstenite)  │     │
//! │   │  Bearer header         │        │   token+tenant in query    │     │
//! │   │  every close transient │        │   4001/4003 permanent      │     │
//! │   └────────────────────────┘        └────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod duplex;
mod push_stream;

pub use duplex::DuplexSocketTransport;
pub use push_stream::PushStreamTransport;

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::{RealtimeConfig, TransportKind};
use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{ChannelEvent, EventSender};

// =============================================================================
// Connection Identity
// =============================================================================

/// Identifies one transport instance for the lifetime of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(raw: u64) -> Self {
        ConnectionId(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// =============================================================================
// Events
// =============================================================================

/// How a transport ended from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Protocol close code, when the transport has one.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        CloseInfo {
            code,
            reason: reason.into(),
        }
    }

    /// Stream ended without a close code.
    pub fn ended(reason: impl Into<String>) -> Self {
        CloseInfo::new(None, reason)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if self.reason.is_empty() => write!(f, "closed with code {}", code),
            Some(code) => write!(f, "closed with code {}: {}", code, self.reason),
            None if self.reason.is_empty() => write!(f, "closed"),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Hook invocation from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Failed(String),
    Closed(CloseInfo),
}

/// Whether a close warrants an automatic reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    Transient,
    /// Re-authentication required; never retried automatically.
    Permanent,
}

/// Sink a transport reports through. Tagged with the connection it belongs to.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    connection: ConnectionId,
    tx: EventSender,
}

impl TransportEvents {
    pub(crate) fn new(connection: ConnectionId, tx: EventSender) -> Self {
        TransportEvents { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Failed(reason.into()));
    }

    pub fn closed(&self, info: CloseInfo) {
        self.emit(TransportEvent::Closed(info));
    }

    /// True once the channel has gone away; the transport may stop early.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(ChannelEvent::Transport {
            connection: self.connection,
            event,
        });
    }
}

// =============================================================================
// Adapter Traits
// =============================================================================

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenTarget {
    pub endpoint: Url,
    pub token: String,
    pub tenant_id: Option<String>,
}

impl fmt::Debug for OpenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTarget")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Opens transport instances of one variant.
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Starts a connection attempt. I/O runs in the background; outcomes
    /// arrive through `events`. An `Err` means nothing was started.
    fn open(
        &self,
        target: &OpenTarget,
        events: TransportEvents,
    ) -> RealtimeResult<Box<dyn TransportConnection>>;

    /// Classifies a remote close.
    fn classify_close(&self, _close: &CloseInfo) -> CloseDisposition {
        CloseDisposition::Transient
    }
}

/// A live transport instance.
pub trait TransportConnection: Send {
    /// Closes the transport. No events are emitted afterwards. Idempotent.
    fn close(&mut self);
}

/// Builds the adapter selected by `config`.
pub fn transport_for(config: &RealtimeConfig) -> RealtimeResult<Arc<dyn TransportAdapter>> {
    let adapter: Arc<dyn TransportAdapter> = match config.realtime.transport {
        TransportKind::PushStream => Arc::new(PushStreamTransport::new(&config.realtime)?),
        TransportKind::Duplex => Arc::new(DuplexSocketTransport::new(
            &config.realtime,
            &config.duplex,
        )),
    };
    Ok(adapter)
}

/// Appends `path` to the endpoint's own path, keeping any base prefix.
pub(crate) fn endpoint_url(endpoint: &Url, path: &str) -> RealtimeResult<Url> {
    if endpoint.cannot_be_a_base() {
        return Err(RealtimeError::InvalidUrl(format!(
            "{} cannot carry a path",
            endpoint
        )));
    }
    let mut url = endpoint.clone();
    let base = endpoint.path().trim_end_matches('/');
    url.set_path(&format!("{}{}", base, path));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
