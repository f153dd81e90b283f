//! Server-sent event stream transport.
//!
//! The credential travels in the `Authorization` header of the initial
//! request. The server cannot tell us *why* a stream ended, so every
//! termination (401/403 responses included) is reported as transient.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest_eventsource::{retry, Event, EventSource};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    endpoint_url, CloseInfo, OpenTarget, TransportAdapter, TransportConnection, TransportEvents,
};
use crate::config::{RealtimeSettings, TransportKind};
use crate::error::{RealtimeError, RealtimeResult};

pub struct PushStreamTransport {
    client: reqwest::Client,
    path: String,
    connect_timeout: Duration,
}

impl PushStreamTransport {
    pub fn new(settings: &RealtimeSettings) -> RealtimeResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| RealtimeError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(PushStreamTransport {
            client,
            path: settings.push_path.clone(),
            connect_timeout: settings.connect_timeout(),
        })
    }

    pub(crate) fn stream_url(&self, target: &OpenTarget) -> RealtimeResult<Url> {
        let mut url = endpoint_url(&target.endpoint, &self.path)?;
        if let Some(tenant) = &target.tenant_id {
            url.query_pairs_mut().append_pair("tenant", tenant);
        }
        Ok(url)
    }
}

impl TransportAdapter for PushStreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PushStream
    }

    fn open(
        &self,
        target: &OpenTarget,
        events: TransportEvents,
    ) -> RealtimeResult<Box<dyn TransportConnection>> {
        let url = self.stream_url(target)?;
        debug!(connection = %events.connection(), url = %url, "Opening event stream");

        let request = self
            .client
            .get(url)
            .bearer_auth(&target.token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let mut source = EventSource::new(request)
            .map_err(|e| RealtimeError::TransportOpen(e.to_string()))?;
        // Reconnect policy belongs to the supervisor.
        source.set_retry_policy(Box::new(retry::Never));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_stream(source, events, shutdown_rx, self.connect_timeout));

        Ok(Box::new(PushStreamConnection {
            shutdown: Some(shutdown_tx),
        }))
    }
}

struct PushStreamConnection {
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportConnection for PushStreamConnection {
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Pumps the event source until it ends or the connection is closed.
///
/// Dropping the connection handle also counts as a close.
async fn run_stream(
    mut source: EventSource,
    events: TransportEvents,
    mut shutdown: oneshot::Receiver<()>,
    open_timeout: Duration,
) {
    let connection = events.connection();
    let handshake = tokio::time::sleep(open_timeout);
    tokio::pin!(handshake);
    let mut opened = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(%connection, "Event stream closed locally");
                source.close();
                return;
            }

            _ = &mut handshake, if !opened => {
                warn!(%connection, timeout_secs = open_timeout.as_secs(), "Event stream handshake timed out");
                source.close();
                events.failed(format!("no response within {}s", open_timeout.as_secs()));
                return;
            }

            next = source.next() => match next {
                Some(Ok(Event::Open)) => {
                    opened = true;
                    info!(%connection, "Event stream open");
                    events.opened();
                }
                Some(Ok(Event::Message(message))) => {
                    events.message(message.data);
                }
                Some(Err(e)) => {
                    let error = RealtimeError::from(e);
                    warn!(%connection, %error, "Event stream terminated");
                    source.close();
                    events.failed(error.to_string());
                    return;
                }
                None => {
                    events.closed(CloseInfo::ended("event stream ended"));
                    return;
                }
            }
        }
    }
}
