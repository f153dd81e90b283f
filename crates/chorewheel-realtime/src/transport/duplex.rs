//! WebSocket transport.
//!
//! Token and tenant ride in the query string of the upgrade request. Two
//! application close codes mark permanent failures: authentication (4001 by
//! default) and authorization (4003). Every other close is transient.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    endpoint_url, CloseDisposition, CloseInfo, OpenTarget, TransportAdapter, TransportConnection,
    TransportEvents,
};
use crate::config::{DuplexSettings, RealtimeSettings, TransportKind};
use crate::error::{RealtimeError, RealtimeResult};

pub struct DuplexSocketTransport {
    path: String,
    connect_timeout: Duration,
    auth_failure_code: u16,
    forbidden_code: u16,
}

impl DuplexSocketTransport {
    pub fn new(settings: &RealtimeSettings, duplex: &DuplexSettings) -> Self {
        DuplexSocketTransport {
            path: settings.socket_path.clone(),
            connect_timeout: settings.connect_timeout(),
            auth_failure_code: duplex.auth_failure_code,
            forbidden_code: duplex.forbidden_code,
        }
    }

    /// `ws(s)://<endpoint><socket_path>?token=..&tenant=..`
    pub(crate) fn socket_url(&self, target: &OpenTarget) -> RealtimeResult<Url> {
        let mut url = endpoint_url(&target.endpoint, &self.path)?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RealtimeError::InvalidUrl(format!(
                    "unsupported scheme for socket endpoint: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::InvalidUrl(format!("cannot use scheme {}", scheme)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", &target.token);
            if let Some(tenant) = &target.tenant_id {
                query.append_pair("tenant", tenant);
            }
        }
        Ok(url)
    }
}

impl TransportAdapter for DuplexSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    fn open(
        &self,
        target: &OpenTarget,
        events: TransportEvents,
    ) -> RealtimeResult<Box<dyn TransportConnection>> {
        let url = self.socket_url(target)?;
        debug!(connection = %events.connection(), path = %url.path(), "Opening socket");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_socket(url, self.connect_timeout, events, shutdown_rx));

        Ok(Box::new(DuplexConnection {
            shutdown: Some(shutdown_tx),
        }))
    }

    fn classify_close(&self, close: &CloseInfo) -> CloseDisposition {
        match close.code {
            Some(code) if code == self.auth_failure_code || code == self.forbidden_code => {
                CloseDisposition::Permanent
            }
            _ => CloseDisposition::Transient,
        }
    }
}

struct DuplexConnection {
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportConnection for DuplexConnection {
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn run_socket(
    url: Url,
    connect_timeout: Duration,
    events: TransportEvents,
    mut shutdown: oneshot::Receiver<()>,
) {
    let connection = events.connection();

    let handshake = timeout(connect_timeout, connect_async(url.as_str()));
    let ws_stream = tokio::select! {
        _ = &mut shutdown => {
            debug!(%connection, "Socket closed before handshake completed");
            return;
        }
        result = handshake => match result {
            Ok(Ok((ws_stream, response))) => {
                debug!(%connection, status = ?response.status(), "WebSocket handshake complete");
                ws_stream
            }
            Ok(Err(e)) => {
                let error = RealtimeError::from(e);
                warn!(%connection, %error, "Socket handshake failed");
                events.failed(error.to_string());
                return;
            }
            Err(_) => {
                warn!(%connection, timeout_secs = connect_timeout.as_secs(), "Socket handshake timed out");
                events.failed(format!("no response within {}s", connect_timeout.as_secs()));
                return;
            }
        }
    };

    info!(%connection, "Socket open");
    events.opened();

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!(%connection, "Closing socket");
                let _ = write.send(WsMessage::Close(None)).await;
                return;
            }

            next = read.next() => match next {
                Some(Ok(WsMessage::Text(text))) => {
                    events.message(text.as_str().to_owned());
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        let error = RealtimeError::from(e);
                        warn!(%connection, %error, "Failed to answer ping");
                        events.failed(error.to_string());
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => CloseInfo::new(
                            Some(u16::from(frame.code)),
                            frame.reason.as_str().to_owned(),
                        ),
                        None => CloseInfo::ended("server closed the socket"),
                    };
                    info!(%connection, code = ?info.code, reason = %info.reason, "Received close frame");
                    events.closed(info);
                    return;
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!(%connection, "Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let error = RealtimeError::from(e);
                    warn!(%connection, %error, "Socket error");
                    events.failed(error.to_string());
                    return;
                }
                None => {
                    events.closed(CloseInfo::ended("socket stream ended"));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;

    fn transport() -> DuplexSocketTransport {
        let config = RealtimeConfig::default();
        DuplexSocketTransport::new(&config.realtime, &config.duplex)
    }

    fn target(endpoint: &str) -> OpenTarget {
        OpenTarget {
            endpoint: Url::parse(endpoint).unwrap(),
            token: "a b&c".into(),
            tenant_id: Some("household-9".into()),
        }
    }

    #[test]
    fn test_socket_url_upgrades_scheme() {
        let url = transport().socket_url(&target("https://api.chorewheel.test")).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/realtime/ws");

        let url = transport().socket_url(&target("http://localhost:8080")).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_socket_url_carries_credentials() {
        let url = transport().socket_url(&target("https://api.chorewheel.test")).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "a b&c".to_string()),
                ("tenant".to_string(), "household-9".to_string()),
            ]
        );
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        assert!(matches!(
            transport().socket_url(&target("ftp://files.chorewheel.test")),
            Err(RealtimeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_close_classification() {
        let transport = transport();
        assert_eq!(
            transport.classify_close(&CloseInfo::new(Some(4001), "auth")),
            CloseDisposition::Permanent
        );
        assert_eq!(
            transport.classify_close(&CloseInfo::new(Some(4003), "forbidden")),
            CloseDisposition::Permanent
        );
        for code in [Some(1000), Some(1006), Some(4000), None] {
            assert_eq!(
                transport.classify_close(&CloseInfo::new(code, "")),
                CloseDisposition::Transient
            );
        }
    }

    #[test]
    fn test_custom_close_codes() {
        let config = RealtimeConfig::default();
        let duplex = DuplexSettings {
            auth_failure_code: 4401,
            forbidden_code: 4403,
        };
        let transport = DuplexSocketTransport::new(&config.realtime, &duplex);
        assert_eq!(
            transport.classify_close(&CloseInfo::new(Some(4401), "")),
            CloseDisposition::Permanent
        );
        assert_eq!(
            transport.classify_close(&CloseInfo::new(Some(4001), "")),
            CloseDisposition::Transient
        );
    }

    // =========================================================================
    // Socket loop against a local server
    // =========================================================================

    use crate::testing::{event_sink, local_target, next_event};
    use crate::transport::TransportEvent;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    const WAIT: Duration = Duration::from_secs(5);

    fn local_transport() -> DuplexSocketTransport {
        DuplexSocketTransport {
            connect_timeout: Duration::from_millis(300),
            ..transport()
        }
    }

    async fn listener() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_socket_reports_messages_then_close_code() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(WsMessage::text(r#"{"type":"heartbeat"}"#)).await.unwrap();
            ws.send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::from(4001),
                reason: "expired".into(),
            })))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let transport = local_transport();
        let (events, mut rx) = event_sink();
        let _connection = transport.open(&local_target(addr), events).unwrap();

        let mut seen = Vec::new();
        while let Some(event) = next_event(&mut rx, WAIT).await {
            seen.push(event);
        }
        let close = CloseInfo::new(Some(4001), "expired");
        assert_eq!(
            seen,
            vec![
                TransportEvent::Opened,
                TransportEvent::Message(r#"{"type":"heartbeat"}"#.into()),
                TransportEvent::Closed(close.clone()),
            ]
        );
        assert_eq!(transport.classify_close(&close), CloseDisposition::Permanent);

        timeout(WAIT, server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_socket_answers_ping() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(WsMessage::Ping(b"beat".to_vec().into())).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Pong(data))) => return data.to_vec(),
                    Some(Ok(_)) => continue,
                    _ => return Vec::new(),
                }
            }
        });

        let (events, mut rx) = event_sink();
        let _connection = local_transport().open(&local_target(addr), events).unwrap();
        assert_eq!(next_event(&mut rx, WAIT).await, Some(TransportEvent::Opened));

        let pong = timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(pong, b"beat".to_vec());
    }

    #[tokio::test]
    async fn test_socket_close_sends_close_frame_and_goes_quiet() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                    _ => return false,
                }
            }
        });

        let (events, mut rx) = event_sink();
        let mut connection = local_transport().open(&local_target(addr), events).unwrap();
        assert_eq!(next_event(&mut rx, WAIT).await, Some(TransportEvent::Opened));

        connection.close();
        assert!(timeout(WAIT, server).await.unwrap().unwrap());
        assert_eq!(next_event(&mut rx, Duration::from_millis(500)).await, None);
    }

    #[tokio::test]
    async fn test_socket_handshake_timeout_fails_once() {
        let (listener, addr) = listener().await;
        // Accepts the TCP connection but never answers the upgrade.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let (events, mut rx) = event_sink();
        let _connection = local_transport().open(&local_target(addr), events).unwrap();

        let event = next_event(&mut rx, WAIT).await;
        assert!(
            matches!(&event, Some(TransportEvent::Failed(reason)) if reason.contains("no response")),
            "unexpected event: {:?}",
            event
        );
        assert_eq!(next_event(&mut rx, Duration::from_millis(500)).await, None);
        server.abort();
    }
}
