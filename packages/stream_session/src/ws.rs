//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each connection runs in its own task: it dials `<base>/query/<id>`, forwards
//! queued requests to the socket and every inbound text frame to a shared
//! event channel tagged with the session id. Must be used inside a tokio
//! runtime.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::transport::{Connection, Connector, ReconnectPolicy, TransportEvent};
use crate::types::SessionId;

/// Sending half of the event channel shared by every connection.
pub type EventSender = mpsc::UnboundedSender<(SessionId, TransportEvent)>;
/// Receiving half, owned by the event loop.
pub type EventReceiver = mpsc::UnboundedReceiver<(SessionId, TransportEvent)>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Endpoint of one session: `<base>/query/<id>`.
pub fn session_url(base: &str, id: SessionId) -> String {
    format!("{}/query/{}", base.trim_end_matches('/'), id.0)
}

pub struct WsConnector {
    base_url: String,
    events: EventSender,
    policy: ReconnectPolicy,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>, events: EventSender) -> Self {
        Self {
            base_url: base_url.into(),
            events,
            policy: ReconnectPolicy::Never,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, id: SessionId) -> Box<dyn Connection> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let url = session_url(&self.base_url, id);

        debug!(session = %id, %url, "spawning websocket connection");
        tokio::spawn(run_connection(
            id,
            url,
            outbound_rx,
            self.events.clone(),
            cancel.clone(),
            self.policy.clone(),
        ));

        Box::new(WsConnection {
            outbound: outbound_tx,
            cancel,
        })
    }
}

/// Handle to one running connection task.
pub struct WsConnection {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Connection for WsConnection {
    fn send_text(&mut self, text: String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.outbound
            .send(text)
            .map_err(|_| SessionError::Transport("connection task has exited".to_string()))
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum PumpExit {
    Cancelled,
    Dropped(String),
}

async fn run_connection(
    id: SessionId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: EventSender,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        let reason = match connected {
            Ok((stream, _)) => {
                attempt = 0;
                info!(session = %id, %url, "connection opened");
                if events.send((id, TransportEvent::Opened)).is_err() {
                    return;
                }
                match pump(id, stream, &mut outbound, &events, &cancel).await {
                    PumpExit::Cancelled => {
                        debug!(session = %id, "connection closed by client");
                        return;
                    }
                    PumpExit::Dropped(reason) => reason,
                }
            }
            Err(e) => format!("connect failed: {e}"),
        };

        warn!(session = %id, %reason, "connection lost");

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            let _ = events.send((id, TransportEvent::Closed { reason }));
            return;
        };
        if events
            .send((id, TransportEvent::Reconnecting { attempt }))
            .is_err()
        {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn pump(
    id: SessionId,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &EventSender,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut ws_write, mut ws_read) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                return PumpExit::Cancelled;
            }

            Some(text) = outbound.recv() => {
                debug!(session = %id, bytes = text.len(), "sending request");
                if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                    return PumpExit::Dropped(e.to_string());
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = text.as_str().to_owned();
                        if events.send((id, TransportEvent::Frame(frame))).is_err() {
                            return PumpExit::Cancelled;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| {
                                format!(
                                    "closed by server ({}) {}",
                                    u16::from(f.code),
                                    f.reason.as_str()
                                )
                            })
                            .unwrap_or_else(|| "closed by server".to_string());
                        return PumpExit::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                        return PumpExit::Dropped("stream ended".to_string());
                    }
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_appends_query_path() {
        assert_eq!(
            session_url("ws://localhost:5000/ws", SessionId(42)),
            "ws://localhost:5000/ws/query/42"
        );
        assert_eq!(
            session_url("ws://localhost:5000/ws/", SessionId(1)),
            "ws://localhost:5000/ws/query/1"
        );
    }

    #[tokio::test]
    async fn closed_connection_refuses_sends() {
        let (tx, _rx) = event_channel();
        let mut connector = WsConnector::new("ws://127.0.0.1:1/ws", tx);
        let mut conn = connector.connect(SessionId(1));
        conn.close();
        conn.close();
        assert!(matches!(
            conn.send_text("{}".to_string()),
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_closed() {
        // Reserve a port, then release it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = event_channel();
        let mut connector = WsConnector::new(format!("ws://{addr}/ws"), tx);
        let _conn = connector.connect(SessionId(5));

        let (id, event) = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, SessionId(5));
        assert!(matches!(event, TransportEvent::Closed { .. }));
    }
}
