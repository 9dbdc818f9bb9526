//! Ordered collection of live sessions, one per pane.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::session::StreamingSession;
use crate::templates::MessageTemplates;
use crate::transport::{Connector, TransportEvent};
use crate::types::SessionId;

pub const DEFAULT_MAX_SESSIONS: usize = 4;

/// Owns every session and the connector that opens their streams.
///
/// Sessions are kept in insertion order; the position of a session is its
/// pane number. Ids are never reused, so events for a removed session can be
/// told apart from events for its replacement.
pub struct SessionRegistry {
    sessions: Vec<StreamingSession>,
    max_sessions: usize,
    next_id: u64,
    connector: Box<dyn Connector>,
    templates: Arc<MessageTemplates>,
    default_model: String,
}

impl SessionRegistry {
    pub fn new(
        connector: Box<dyn Connector>,
        max_sessions: usize,
        templates: Arc<MessageTemplates>,
    ) -> Self {
        Self {
            sessions: Vec::new(),
            max_sessions: max_sessions.max(1),
            next_id: 1,
            connector,
            templates,
            default_model: String::new(),
        }
    }

    /// Model given to sessions created from now on.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn set_default_model(&mut self, model: impl Into<String>) {
        self.default_model = model.into();
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Open a new session at the end. Returns `None` at capacity.
    pub fn add_session(&mut self) -> Option<SessionId> {
        if self.is_full() {
            debug!(max = self.max_sessions, "session limit reached");
            return None;
        }
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let connection = self.connector.connect(id);
        let session = StreamingSession::new(
            id,
            self.default_model.clone(),
            connection,
            self.templates.clone(),
        );
        self.sessions.push(session);
        info!(session = %id, count = self.sessions.len(), "session added");
        Some(id)
    }

    /// Close and drop the most recently added session. Returns `None` when
    /// there is nothing left to remove.
    pub fn remove_session(&mut self) -> Option<SessionId> {
        let mut session = self.sessions.pop()?;
        session.close();
        let id = session.id();
        info!(session = %id, count = self.sessions.len(), "session removed");
        Some(id)
    }

    pub fn sessions(&self) -> &[StreamingSession] {
        &self.sessions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamingSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, StreamingSession> {
        self.sessions.iter_mut()
    }

    pub fn get(&self, id: SessionId) -> Option<&StreamingSession> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut StreamingSession> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    /// Session shown in pane `position` (0-based).
    pub fn by_position(&self, position: usize) -> Option<&StreamingSession> {
        self.sessions.get(position)
    }

    pub fn by_position_mut(&mut self, position: usize) -> Option<&mut StreamingSession> {
        self.sessions.get_mut(position)
    }

    pub fn position_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id() == id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Route a transport event to its session.
    ///
    /// Events for sessions that were already removed are reported as
    /// [`SessionError::UnknownSession`]; callers usually just log them.
    pub fn handle_event(&mut self, id: SessionId, event: TransportEvent) -> Result<()> {
        let session = self
            .get_mut(id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.handle_event(event);
        Ok(())
    }

    pub fn close_all(&mut self) {
        for session in &mut self.sessions {
            session.close();
        }
    }
}

impl<'a> IntoIterator for &'a SessionRegistry {
    type Item = &'a StreamingSession;
    type IntoIter = std::slice::Iter<'a, StreamingSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}

impl<'a> IntoIterator for &'a mut SessionRegistry {
    type Item = &'a mut StreamingSession;
    type IntoIter = std::slice::IterMut<'a, StreamingSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::transport::RecordingConnector;
    use crate::types::Query;

    fn registry(max: usize) -> (SessionRegistry, RecordingConnector) {
        let connector = RecordingConnector::new();
        let registry = SessionRegistry::new(
            Box::new(connector.clone()),
            max,
            Arc::new(MessageTemplates::default()),
        )
        .with_default_model("granite");
        (registry, connector)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let (mut reg, _) = registry(4);
        let a = reg.add_session().unwrap();
        let b = reg.add_session().unwrap();
        assert_eq!(reg.remove_session(), Some(b));
        let c = reg.add_session().unwrap();
        assert_eq!(a, SessionId(1));
        assert_eq!(b, SessionId(2));
        assert_eq!(c, SessionId(3));
    }

    #[test]
    fn add_respects_limit() {
        let (mut reg, connector) = registry(2);
        assert!(reg.add_session().is_some());
        assert!(reg.add_session().is_some());
        assert!(reg.is_full());
        assert_eq!(reg.add_session(), None);
        assert_eq!(reg.len(), 2);
        assert_eq!(connector.connected().len(), 2);
    }

    #[test]
    fn remove_goes_down_to_zero() {
        let (mut reg, connector) = registry(4);
        let only = reg.add_session().unwrap();

        assert_eq!(reg.remove_session(), Some(only));
        assert!(reg.is_empty());
        assert_eq!(connector.log(only).close_calls, 1);

        assert_eq!(reg.remove_session(), None);
        assert_eq!(reg.len(), 0);
        assert_eq!(connector.log(only).close_calls, 1);

        let next = reg.add_session().unwrap();
        assert_eq!(next, SessionId(2));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_closes_the_newest_session() {
        let (mut reg, connector) = registry(4);
        let first = reg.add_session().unwrap();
        let second = reg.add_session().unwrap();
        assert_eq!(reg.remove_session(), Some(second));
        assert_eq!(connector.log(second).close_calls, 1);
        assert_eq!(connector.log(first).close_calls, 0);
        assert_eq!(reg.by_position(0).map(|s| s.id()), Some(first));
    }

    #[test]
    fn events_route_by_id() {
        let (mut reg, _) = registry(4);
        let a = reg.add_session().unwrap();
        let b = reg.add_session().unwrap();

        reg.handle_event(b, TransportEvent::Opened).unwrap();

        assert_eq!(reg.get(a).unwrap().state(), SessionState::Connecting);
        assert_eq!(reg.get(b).unwrap().state(), SessionState::Idle);
    }

    #[test]
    fn events_for_removed_session_are_rejected() {
        let (mut reg, _) = registry(4);
        reg.add_session().unwrap();
        let gone = reg.add_session().unwrap();
        reg.remove_session();
        let err = reg.handle_event(gone, TransportEvent::Opened).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(id) if id == gone));
    }

    #[test]
    fn new_sessions_use_default_model() {
        let (mut reg, connector) = registry(4);
        let id = reg.add_session().unwrap();
        reg.handle_event(id, TransportEvent::Opened).unwrap();
        reg.get_mut(id)
            .unwrap()
            .send_query(&Query::new("q"))
            .unwrap();
        assert!(connector.sent(id)[0].contains(r#""model":"granite""#));
        assert_eq!(reg.get(id).unwrap().model(), "granite");
    }

    #[test]
    fn close_all_closes_each_once() {
        let (mut reg, connector) = registry(4);
        let a = reg.add_session().unwrap();
        let b = reg.add_session().unwrap();
        reg.close_all();
        drop(reg);
        assert_eq!(connector.log(a).close_calls, 1);
        assert_eq!(connector.log(b).close_calls, 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let (reg, _) = registry(0);
        assert_eq!(reg.max_sessions(), 1);
    }
}
