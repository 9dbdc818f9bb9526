//! The connection seam between a session and its duplex stream.
//!
//! A [`Connector`] opens one [`Connection`] per session. Connecting never
//! blocks: the connection reports its progress later as [`TransportEvent`]s
//! delivered to whoever drives the sessions' event loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, SessionError};
use crate::types::SessionId;

/// Lifecycle and data events produced by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream is open and can carry requests.
    Opened,
    /// One inbound text message.
    Frame(String),
    /// The stream dropped and the reconnect policy allows another attempt.
    Reconnecting { attempt: u32 },
    /// The stream is gone for good.
    Closed { reason: String },
}

/// Outbound half of one session's duplex stream.
pub trait Connection: Send {
    /// Queue one text message. Must not block.
    fn send_text(&mut self, text: String) -> Result<()>;

    /// Tear the stream down. Idempotent.
    fn close(&mut self);
}

/// Opens connections, one per session.
pub trait Connector: Send {
    fn connect(&mut self, id: SessionId) -> Box<dyn Connection>;
}

/// Whether and how a dropped stream is re-established.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Transport failure is terminal.
    #[default]
    Never,
    /// Retry up to `max_attempts` times, waiting `delay` before each attempt.
    Fixed { max_attempts: u32, delay: Duration },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// when the policy is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt >= 1 && attempt <= *max_attempts).then_some(*delay),
        }
    }
}

/// What a [`RecordingConnector`] has observed for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionLog {
    pub sent: Vec<String>,
    pub close_calls: usize,
}

/// In-memory connector that records every frame and close call.
///
/// Used to drive sessions without a network, e.g. in tests or dry runs.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    logs: Arc<Mutex<HashMap<SessionId, ConnectionLog>>>,
    fail_sends: Arc<Mutex<bool>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail, as a dropped stream would.
    pub fn fail_sends(&self, fail: bool) {
        if let Ok(mut guard) = self.fail_sends.lock() {
            *guard = fail;
        }
    }

    pub fn log(&self, id: SessionId) -> ConnectionLog {
        self.logs
            .lock()
            .ok()
            .and_then(|logs| logs.get(&id).cloned())
            .unwrap_or_default()
    }

    pub fn sent(&self, id: SessionId) -> Vec<String> {
        self.log(id).sent
    }

    pub fn connected(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .logs
            .lock()
            .map(|logs| logs.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl Connector for RecordingConnector {
    fn connect(&mut self, id: SessionId) -> Box<dyn Connection> {
        if let Ok(mut logs) = self.logs.lock() {
            logs.entry(id).or_default();
        }
        Box::new(RecordingConnection {
            id,
            logs: self.logs.clone(),
            fail_sends: self.fail_sends.clone(),
            closed: false,
        })
    }
}

struct RecordingConnection {
    id: SessionId,
    logs: Arc<Mutex<HashMap<SessionId, ConnectionLog>>>,
    fail_sends: Arc<Mutex<bool>>,
    closed: bool,
}

impl Connection for RecordingConnection {
    fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.fail_sends.lock().map(|f| *f).unwrap_or(false) {
            return Err(SessionError::Transport("send refused".to_string()));
        }
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| SessionError::Transport("connection log poisoned".to_string()))?;
        logs.entry(self.id).or_default().sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        if let Ok(mut logs) = self.logs.lock() {
            logs.entry(self.id).or_default().close_calls += 1;
        }
    }
}
