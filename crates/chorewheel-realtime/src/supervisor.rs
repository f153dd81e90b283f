//! # Connection Supervisor
//!
//! The channel state machine. Owns the single active transport, the attempt
//! counter and the three timers, and is only ever driven from the channel
//! actor, one event at a time.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Connection Lifecycle                             │
//! │                                                                         │
//! │            connect()                 Opened                             │
//! │  ┌────────┐ preconditions ok ┌────────────┐ ─────────► ┌────────┐      │
//! │  │ CLOSED │ ───────────────► │ CONNECTING │            │  OPEN  │      │
//! │  └────────┘ ◄─────────────── └────────────┘ ◄───────── └────────┘      │
//! │      ▲   Failed / Closed / disconnect()      Failed / Closed /   │      │
//! │      │                                       stale / disconnect() │      │
//! │      │                                                           │      │
//! │  ON TERMINATION                                                  │      │
//! │  ──────────────                                                  │      │
//! │  permanent close  → PermanentAuth, no retry                      │      │
//! │  manual           → nothing                                      │      │
//! │  transient        → attempts += 1, breaker.record_failure()      │      │
//! │                     breaker opened → wait for cooldown           │      │
//! │                     else           → retry after table[attempts-1]      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chorewheel_core::{DiagnosticUpdate, EventDispatcher, EventEnvelope};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffScheduler;
use crate::circuit::CircuitBreaker;
use crate::collaborators::{CacheInvalidator, CredentialProvider};
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{ChannelEvent, EventSender};
use crate::heartbeat::{HeartbeatCheck, HeartbeatMonitor};
use crate::status::{ChannelStatus, ConnectionState, Diagnostics, LastEvent, StatusError};
use crate::transport::{
    CloseDisposition, CloseInfo, ConnectionId, OpenTarget, TransportAdapter,
    TransportConnection, TransportEvent, TransportEvents,
};

/// Result of a successful `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new transport was created; the channel is Connecting.
    Started,
    /// A transport is already Connecting or Open.
    AlreadyActive,
}

/// What the supervisor calls out to.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub(crate) adapter: Arc<dyn TransportAdapter>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) invalidator: Arc<dyn CacheInvalidator>,
}

/// Where snapshots are published.
#[derive(Clone)]
pub(crate) struct Publishers {
    pub(crate) status: Arc<watch::Sender<ChannelStatus>>,
    pub(crate) diagnostics: Arc<watch::Sender<Diagnostics>>,
}

struct ActiveTransport {
    id: ConnectionId,
    connection: Box<dyn TransportConnection>,
}

enum Admission {
    AlreadyActive,
    Ready(OpenTarget),
}

enum Termination {
    Failed(String),
    Closed(CloseInfo),
    Stale,
}

#[derive(Debug, Default)]
struct Counters {
    messages_received: u64,
    parse_errors: u64,
    last_parse_error: Option<String>,
    unknown_events: u64,
    last_unknown_event: Option<String>,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

pub(crate) struct ConnectionSupervisor {
    session_id: Uuid,
    collaborators: Collaborators,
    dispatcher: EventDispatcher,
    max_attempts: u32,

    state: ConnectionState,
    attempts: u32,
    manual_disconnect: bool,
    transport: Option<ActiveTransport>,
    next_connection: u64,

    backoff: BackoffScheduler,
    breaker: CircuitBreaker,
    heartbeat: HeartbeatMonitor,

    last_event: Option<LastEvent>,
    last_error: Option<StatusError>,
    counters: Counters,
    events: EventSender,
    publishers: Publishers,
}

impl ConnectionSupervisor {
    pub(crate) fn new(
        config: &RealtimeConfig,
        collaborators: Collaborators,
        events: EventSender,
        publishers: Publishers,
    ) -> Self {
        ConnectionSupervisor {
            session_id: Uuid::new_v4(),
            collaborators,
            dispatcher: EventDispatcher::default(),
            max_attempts: config.backoff.max_attempts,
            state: ConnectionState::Closed,
            attempts: 0,
            manual_disconnect: false,
            transport: None,
            next_connection: 0,
            backoff: BackoffScheduler::new(&config.backoff, events.clone()),
            breaker: CircuitBreaker::new(&config.circuit, events.clone()),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat, events.clone()),
            last_event: None,
            last_error: None,
            counters: Counters::default(),
            events,
            publishers,
        }
    }

    pub(crate) fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Explicit connect from the consumer. Lifts a previous manual disconnect,
    /// but only once the request has been admitted; a rejected connect leaves
    /// the channel untouched.
    pub(crate) fn connect(&mut self) -> RealtimeResult<ConnectOutcome> {
        let admission = self.admit()?;
        self.manual_disconnect = false;
        match admission {
            Admission::AlreadyActive => Ok(ConnectOutcome::AlreadyActive),
            Admission::Ready(target) => self.start_transport(target),
        }
    }

    /// Closes everything and suppresses automatic reconnects until the next
    /// explicit `connect()`.
    pub(crate) fn disconnect(&mut self) {
        // Must be set before the transport is closed.
        self.manual_disconnect = true;

        let cancelled_retry = self.backoff.cancel();
        self.heartbeat.stop();

        let Some(mut active) = self.transport.take() else {
            if cancelled_retry {
                info!("Pending reconnect cancelled");
                self.publish();
            }
            return;
        };

        active.connection.close();
        info!(connection = %active.id, "Disconnected");
        self.set_state(ConnectionState::Closed);
        self.publish();
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub(crate) fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Transport { connection, event } => {
                self.handle_transport_event(connection, event)
            }

            ChannelEvent::RetryDue { generation } => {
                if !self.backoff.take_fired(generation) {
                    return;
                }
                if self.manual_disconnect {
                    return;
                }
                debug!(attempt = self.attempts, "Retrying connection");
                if let Err(e) = self.attempt_connect() {
                    debug!(error = %e, "Retry not started");
                }
                self.publish();
            }

            ChannelEvent::HeartbeatCheck { generation } => {
                if let HeartbeatCheck::Stale { silent_for } = self.heartbeat.check(generation) {
                    warn!(silent_secs = silent_for.as_secs(), "No liveness signal, forcing reconnect");
                    self.terminate(Termination::Stale);
                }
            }

            ChannelEvent::CooldownElapsed { generation } => {
                if !self.breaker.take_cooldown(generation) {
                    return;
                }
                self.attempts = 0;
                self.publish();
                if self.manual_disconnect {
                    debug!("Cooldown elapsed while disconnected; staying closed");
                    return;
                }
                if let Err(e) = self.attempt_connect() {
                    debug!(error = %e, "Post-cooldown connect not started");
                }
                self.publish();
            }
        }
    }

    fn handle_transport_event(&mut self, connection: ConnectionId, event: TransportEvent) {
        let active = self.transport.as_ref().map(|t| t.id);
        if active != Some(connection) {
            debug!(%connection, ?active, "Ignoring event from superseded transport");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(connection),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Failed(reason) => self.terminate(Termination::Failed(reason)),
            TransportEvent::Closed(info) => self.terminate(Termination::Closed(info)),
        }
    }

    fn on_open(&mut self, connection: ConnectionId) {
        if self.state == ConnectionState::Open {
            return;
        }

        info!(%connection, after_attempts = self.attempts, "Realtime channel open");
        self.set_state(ConnectionState::Open);
        self.attempts = 0;
        self.breaker.record_success();
        self.heartbeat.start();
        self.last_error = None;

        self.apply(&EventEnvelope::connection_established());
        self.publish();
    }

    fn on_message(&mut self, text: &str) {
        let envelope = match EventEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let error = RealtimeError::from(e);
                warn!(%error, "Dropping malformed message");
                self.counters.parse_errors += 1;
                self.counters.last_parse_error = Some(error.to_string());
                self.publish_diagnostics();
                return;
            }
        };

        self.counters.messages_received += 1;
        self.heartbeat.record_heartbeat();
        self.apply(&envelope);
        self.publish();
    }

    /// Runs one envelope through the dispatch table.
    fn apply(&mut self, envelope: &EventEnvelope) {
        let dispatch = self.dispatcher.dispatch(envelope);

        for key in &dispatch.invalidations {
            self.collaborators.invalidator.invalidate(key);
        }
        if !dispatch.invalidations.is_empty() {
            debug!(
                event_type = %envelope.event_type,
                keys = dispatch.invalidations.len(),
                "Cache invalidated"
            );
        }

        match dispatch.diagnostic {
            DiagnosticUpdate::None => {}
            DiagnosticUpdate::HeartbeatSeen => {
                self.counters.last_heartbeat_at = Some(Utc::now());
            }
            DiagnosticUpdate::ClearLastError => {
                self.last_error = None;
            }
            DiagnosticUpdate::RecordError(message) => {
                warn!(%message, "Server reported an error");
                self.last_error = Some(StatusError::server(message));
            }
            DiagnosticUpdate::UnknownEvent(event_type) => {
                debug!(%event_type, "Unknown event type");
                self.counters.unknown_events += 1;
                self.counters.last_unknown_event = Some(event_type);
            }
        }

        self.last_event = Some(LastEvent {
            kind: envelope.event_type.clone(),
            at: Utc::now(),
        });
    }

    // =========================================================================
    // Connecting
    // =========================================================================

    fn attempt_connect(&mut self) -> RealtimeResult<ConnectOutcome> {
        match self.admit()? {
            Admission::AlreadyActive => Ok(ConnectOutcome::AlreadyActive),
            Admission::Ready(target) => self.start_transport(target),
        }
    }

    /// Connect preconditions. Has no side effects.
    fn admit(&self) -> RealtimeResult<Admission> {
        if self.breaker.is_open() {
            return Err(RealtimeError::CircuitOpen {
                retry_after: self.breaker.retry_after(),
            });
        }

        if self.transport.is_some() {
            return Ok(Admission::AlreadyActive);
        }

        if self.attempts >= self.max_attempts {
            return Err(RealtimeError::Precondition(format!(
                "attempt ceiling of {} reached",
                self.max_attempts
            )));
        }

        self.resolve_target().map(Admission::Ready)
    }

    fn start_transport(&mut self, target: OpenTarget) -> RealtimeResult<ConnectOutcome> {
        // Supersedes any pending retry.
        self.backoff.cancel();

        self.next_connection += 1;
        let id = ConnectionId::new(self.next_connection);
        let events = TransportEvents::new(id, self.events.clone());

        info!(
            connection = %id,
            transport = %self.collaborators.adapter.kind(),
            attempt = self.attempts,
            "Connecting"
        );

        match self.collaborators.adapter.open(&target, events) {
            Ok(connection) => {
                self.transport = Some(ActiveTransport { id, connection });
                self.set_state(ConnectionState::Connecting);
                self.publish();
                Ok(ConnectOutcome::Started)
            }
            Err(e) => {
                let error = match e {
                    RealtimeError::TransportOpen(_) => e,
                    other => RealtimeError::TransportOpen(other.to_string()),
                };
                warn!(connection = %id, %error, "Transport could not be started");
                self.set_state(ConnectionState::Closed);
                self.record_transient_failure(&error);
                self.publish();
                Err(error)
            }
        }
    }

    fn resolve_target(&self) -> RealtimeResult<OpenTarget> {
        let credentials = &self.collaborators.credentials;
        if !credentials.is_valid() {
            return Err(RealtimeError::Precondition(
                "credentials missing or expired".into(),
            ));
        }
        let token = credentials
            .token()
            .ok_or_else(|| RealtimeError::Precondition("no token available".into()))?;
        let endpoint = credentials
            .endpoint()
            .ok_or_else(|| RealtimeError::Precondition("no endpoint configured".into()))?;

        Ok(OpenTarget {
            endpoint,
            token,
            tenant_id: credentials.tenant_id(),
        })
    }

    // =========================================================================
    // Termination
    // =========================================================================

    fn terminate(&mut self, termination: Termination) {
        let was_open = self.state == ConnectionState::Open;
        self.heartbeat.stop();

        if let Some(mut active) = self.transport.take() {
            if matches!(termination, Termination::Stale) {
                active.connection.close();
            }
            debug!(connection = %active.id, "Transport released");
        }
        self.set_state(ConnectionState::Closed);

        let error = match termination {
            Termination::Failed(reason) if was_open => RealtimeError::Transient(reason),
            Termination::Failed(reason) => RealtimeError::TransportOpen(reason),
            Termination::Stale => RealtimeError::Transient("heartbeat timed out".into()),
            Termination::Closed(info) => {
                match self.collaborators.adapter.classify_close(&info) {
                    CloseDisposition::Permanent => RealtimeError::PermanentAuth {
                        code: info.code.unwrap_or_default(),
                        reason: info.reason,
                    },
                    CloseDisposition::Transient => RealtimeError::Transient(info.to_string()),
                }
            }
        };

        if let RealtimeError::PermanentAuth { code, .. } = &error {
            error!(code, %error, "Realtime channel rejected credentials; not retrying");
            self.last_error = Some(StatusError::from_error(&error));
            self.publish();
            return;
        }

        if self.manual_disconnect {
            debug!(%error, "Termination after manual disconnect");
            self.publish();
            return;
        }

        info!(%error, "Realtime connection lost");
        self.record_transient_failure(&error);
        self.publish();
    }

    /// Counts a failure and either schedules the next retry or leaves the
    /// breaker cooldown as the way back.
    fn record_transient_failure(&mut self, error: &RealtimeError) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(StatusError::from_error(error));

        if self.breaker.record_failure() {
            let open = RealtimeError::CircuitOpen {
                retry_after: self.breaker.retry_after(),
            };
            self.last_error = Some(StatusError::from_error(&open));
            return;
        }
        if self.breaker.is_open() {
            return;
        }

        let delay = self.backoff.schedule_retry(self.attempts - 1);
        info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "State transition");
            self.state = state;
        }
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            transport: self.collaborators.adapter.kind(),
            attempts: self.attempts,
            circuit: self.breaker.state(),
            circuit_opened_at: self.breaker.opened_at(),
            consecutive_failures: self.breaker.failures(),
            reconnect_pending: self.backoff.is_pending(),
            last_seen_at: self.heartbeat.last_seen_at(),
            last_heartbeat_at: self.counters.last_heartbeat_at,
            messages_received: self.counters.messages_received,
            parse_errors: self.counters.parse_errors,
            last_parse_error: self.counters.last_parse_error.clone(),
            unknown_events: self.counters.unknown_events,
            last_unknown_event: self.counters.last_unknown_event.clone(),
        }
    }

    fn publish(&self) {
        let state = self.state;
        let circuit_open = self.breaker.is_open();
        let last_event = self.last_event.clone();
        let last_error = self.last_error.clone();

        self.publishers.status.send_modify(|status| {
            status.state = state;
            status.circuit_open = circuit_open;
            status.last_event = last_event;
            status.last_error = last_error;
        });
        self.publish_diagnostics();
    }

    fn publish_diagnostics(&self) {
        self.publishers.diagnostics.send_replace(self.diagnostics());
    }
}
