//! The per-pane streaming session.
//!
//! A session owns one connection, one in-flight [`Answer`], one append-only
//! [`History`] and the current turn's [`TurnMetrics`]. Every method runs to
//! completion without blocking; network I/O happens behind the
//! [`Connection`] and comes back as [`TransportEvent`]s.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::metrics::{MetricsSnapshot, TurnMetrics};
use crate::protocol::{InboundEvent, OutboundRequest, UNSCORED};
use crate::templates::MessageTemplates;
use crate::transport::{Connection, TransportEvent};
use crate::types::{Answer, Collection, History, MessageEntry, Query, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Waiting for the stream to open.
    Connecting,
    /// Open, no turn in progress.
    Idle,
    /// A request was sent; tokens and sources accumulate.
    Streaming,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Result of a successful [`StreamingSession::send_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The request went out and a new turn started.
    Sent,
    /// The query was empty; a local notice was shown instead.
    EmptyQuery,
}

/// Immutable view of a session for rendering and inspection.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub id: SessionId,
    pub model: String,
    pub state: SessionState,
    pub history: History,
    pub answer: Answer,
    pub notice: Option<Answer>,
    pub metrics: MetricsSnapshot,
}

pub struct StreamingSession {
    id: SessionId,
    model: String,
    state: SessionState,
    connection: Box<dyn Connection>,
    answer: Answer,
    notice: Option<Answer>,
    history: History,
    metrics: TurnMetrics,
    templates: Arc<MessageTemplates>,
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("state", &self.state)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl StreamingSession {
    /// Create a session around a freshly opened connection. The session starts
    /// in [`SessionState::Connecting`] with the greeting as its only history.
    pub fn new(
        id: SessionId,
        model: impl Into<String>,
        connection: Box<dyn Connection>,
        templates: Arc<MessageTemplates>,
    ) -> Self {
        let history = History::with_greeting(Answer::from_text(templates.greeting.clone()));
        Self {
            id,
            model: model.into(),
            state: SessionState::Connecting,
            connection,
            answer: Answer::default(),
            notice: None,
            history,
            metrics: TurnMetrics::default(),
            templates,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// The answer currently being streamed (not yet in history).
    pub fn answer(&self) -> &Answer {
        &self.answer
    }

    /// Local notice shown after an empty submission.
    pub fn notice(&self) -> Option<&Answer> {
        self.notice.as_ref()
    }

    pub fn metrics(&self) -> &TurnMetrics {
        &self.metrics
    }

    pub fn transcript(&self) -> Transcript {
        Transcript {
            id: self.id,
            model: self.model.clone(),
            state: self.state,
            history: self.history.clone(),
            answer: self.answer.clone(),
            notice: self.notice.clone(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Choose the model named in subsequent requests.
    pub fn set_model(&mut self, model: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.model = model.into();
        debug!(session = %self.id, model = %self.model, "model changed");
        Ok(())
    }

    pub fn send_query(&mut self, query: &Query) -> Result<SendOutcome> {
        self.send_query_at(query, Instant::now())
    }

    /// Start a new turn. Once the request is out, the previous in-flight
    /// answer and the query are committed to history. A failed send closes
    /// the session and leaves history untouched.
    ///
    /// An empty query sends nothing and leaves history alone; it only sets
    /// the local notice.
    pub fn send_query_at(&mut self, query: &Query, now: Instant) -> Result<SendOutcome> {
        self.ensure_open()?;

        if query.is_empty() {
            debug!(session = %self.id, "empty query, showing notice");
            self.notice = Some(Answer::from_text(self.templates.empty_query.clone()));
            return Ok(SendOutcome::EmptyQuery);
        }

        if self.state == SessionState::Connecting {
            return Err(SessionError::NotConnected);
        }

        let frame = OutboundRequest::new(&self.model, query).encode()?;
        if let Err(e) = self.connection.send_text(frame) {
            warn!(session = %self.id, error = %e, "failed to send request");
            self.close();
            return Err(e);
        }

        self.commit_answer();
        self.history.append(MessageEntry::Query(query.clone()));
        self.notice = None;
        self.metrics.start(now);
        debug!(session = %self.id, model = %self.model, "request sent");
        self.state = SessionState::Streaming;
        Ok(SendOutcome::Sent)
    }

    /// Replace history with the greeting and drop any in-flight turn.
    pub fn reset_history(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.history.reset(Answer::from_text(self.templates.greeting.clone()));
        self.answer = Answer::default();
        self.notice = None;
        self.metrics.reset();
        self.end_turn();
        debug!(session = %self.id, "history reset");
        Ok(())
    }

    /// Commit the in-flight answer, then append a system answer announcing
    /// the new product/version. Neither the connection nor the stream state
    /// changes: tokens still arriving for the running turn accumulate into a
    /// fresh in-flight answer.
    pub fn change_context(&mut self, collection: &Collection, version: &str) -> Result<()> {
        self.ensure_open()?;
        self.commit_answer();
        let message = self.templates.context_message(collection, version);
        self.history.append(MessageEntry::Answer(Answer::from_text(message)));
        self.notice = None;
        debug!(
            session = %self.id,
            collection = %collection.collection_base_name,
            version,
            "context changed"
        );
        Ok(())
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        self.handle_event_at(event, Instant::now());
    }

    /// Apply one transport event. Events are processed strictly in the order
    /// they are handed in; a closed session ignores everything.
    pub fn handle_event_at(&mut self, event: TransportEvent, now: Instant) {
        if self.is_closed() {
            return;
        }
        match event {
            TransportEvent::Opened => {
                if self.state == SessionState::Connecting {
                    info!(session = %self.id, "session ready");
                    self.state = SessionState::Idle;
                }
            }
            TransportEvent::Frame(text) => self.apply_frame(&text, now),
            TransportEvent::Reconnecting { attempt } => {
                info!(session = %self.id, attempt, "reconnecting");
                self.state = SessionState::Connecting;
            }
            TransportEvent::Closed { reason } => {
                warn!(session = %self.id, %reason, "transport closed");
                self.close();
            }
        }
    }

    /// Tear the session down. Idempotent: the connection is closed once.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.connection.close();
        self.state = SessionState::Closed;
        info!(session = %self.id, "session closed");
    }

    fn apply_frame(&mut self, text: &str, now: Instant) {
        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(session = %self.id, error = %e, "ignoring malformed event");
                return;
            }
        };

        match event {
            InboundEvent::Token { token } => {
                if self.state != SessionState::Streaming {
                    debug!(session = %self.id, "dropping token outside a turn");
                    return;
                }
                self.answer.push_token(token, Utc::now());
                self.metrics.record_token(now);
            }
            InboundEvent::Source { source, score } => {
                if self.state != SessionState::Streaming {
                    debug!(session = %self.id, "dropping source outside a turn");
                    return;
                }
                self.answer.merge_source(&source, score.unwrap_or(UNSCORED));
            }
            InboundEvent::Unknown => {
                debug!(session = %self.id, "ignoring unknown event type");
            }
        }
    }

    fn commit_answer(&mut self) {
        let answer = std::mem::take(&mut self.answer);
        if !answer.is_empty() {
            self.history.append(MessageEntry::Answer(answer));
        }
    }

    fn end_turn(&mut self) {
        if self.state == SessionState::Streaming {
            self.state = SessionState::Idle;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.close();
    }
}
