//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::collaborators::StaticCredentials;
use crate::config::TransportKind;
use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{ChannelEvent, EventReceiver};
use crate::transport::{
    CloseDisposition, CloseInfo, ConnectionId, OpenTarget, TransportAdapter, TransportConnection,
    TransportEvent, TransportEvents,
};

/// Lets spawned timer and actor tasks run to their next await point.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn credentials() -> Arc<StaticCredentials> {
    let endpoint = Url::parse("https://api.chorewheel.test").unwrap();
    Arc::new(StaticCredentials::new(endpoint, "test-token").with_tenant("household-1"))
}

/// Event sink for driving a real transport outside the actor.
pub(crate) fn event_sink() -> (TransportEvents, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TransportEvents::new(ConnectionId::new(1), tx), rx)
}

/// Next transport event, or `None` if the sink went quiet for `wait` or the
/// transport task dropped it.
pub(crate) async fn next_event(rx: &mut EventReceiver, wait: Duration) -> Option<TransportEvent> {
    match tokio::time::timeout(wait, rx.recv()).await {
        Ok(Some(ChannelEvent::Transport { event, .. })) => Some(event),
        Ok(Some(other)) => panic!("unexpected channel event: {:?}", other),
        Ok(None) | Err(_) => None,
    }
}

/// Target pointing at a local test server.
pub(crate) fn local_target(addr: std::net::SocketAddr) -> OpenTarget {
    OpenTarget {
        endpoint: Url::parse(&format!("http://{}", addr)).unwrap(),
        token: "test-token".into(),
        tenant_id: Some("household-1".into()),
    }
}

/// One `open` call seen by the mock.
pub(crate) struct MockOpen {
    pub(crate) target: OpenTarget,
    pub(crate) events: TransportEvents,
    closed: Arc<AtomicBool>,
}

/// Transport that never touches the network. Tests drive it through the
/// recorded event sinks.
pub(crate) struct MockTransport {
    kind: TransportKind,
    permanent_codes: Vec<u16>,
    fail_open: AtomicBool,
    opens: Mutex<Vec<MockOpen>>,
}

impl MockTransport {
    /// Mock with the duplex close-code rules (4001/4003 permanent).
    pub(crate) fn duplex() -> Arc<Self> {
        Arc::new(MockTransport {
            kind: TransportKind::Duplex,
            permanent_codes: vec![4001, 4003],
            fail_open: AtomicBool::new(false),
            opens: Mutex::new(Vec::new()),
        })
    }

    /// Mock with push-stream rules (nothing permanent).
    pub(crate) fn push_stream() -> Arc<Self> {
        Arc::new(MockTransport {
            kind: TransportKind::PushStream,
            permanent_codes: Vec::new(),
            fail_open: AtomicBool::new(false),
            opens: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Sink of the `index`-th opened transport.
    pub(crate) fn events(&self, index: usize) -> TransportEvents {
        self.opens.lock().unwrap()[index].events.clone()
    }

    /// Sink of the most recently opened transport.
    pub(crate) fn last(&self) -> TransportEvents {
        let opens = self.opens.lock().unwrap();
        opens.last().expect("no transport opened").events.clone()
    }

    pub(crate) fn target(&self, index: usize) -> OpenTarget {
        self.opens.lock().unwrap()[index].target.clone()
    }

    pub(crate) fn is_closed(&self, index: usize) -> bool {
        self.opens.lock().unwrap()[index].closed.load(Ordering::SeqCst)
    }

    /// Transports opened and not yet closed by the channel.
    pub(crate) fn live_count(&self) -> usize {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .filter(|open| !open.closed.load(Ordering::SeqCst))
            .count()
    }
}

impl TransportAdapter for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(
        &self,
        target: &OpenTarget,
        events: TransportEvents,
    ) -> RealtimeResult<Box<dyn TransportConnection>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(RealtimeError::InvalidUrl("mock refused to open".into()));
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.opens.lock().unwrap().push(MockOpen {
            target: target.clone(),
            events,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(MockConnection { closed }))
    }

    fn classify_close(&self, close: &CloseInfo) -> CloseDisposition {
        match close.code {
            Some(code) if self.permanent_codes.contains(&code) => CloseDisposition::Permanent,
            _ => CloseDisposition::Transient,
        }
    }
}

struct MockConnection {
    closed: Arc<AtomicBool>,
}

impl TransportConnection for MockConnection {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        // A dropped connection is no longer live either.
        self.closed.store(true, Ordering::SeqCst);
    }
}
