//! Fan-out of user actions to every registered session.
//!
//! The current product/version/language selection is passed in explicitly
//! rather than read from shared state, so each broadcast sees exactly one
//! selection and sessions stay testable on their own.

use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::registry::SessionRegistry;
use crate::session::SendOutcome;
use crate::types::{Collection, Query, SessionId};

/// The selection every broadcast is made under.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionContext {
    pub collection: Collection,
    pub version: String,
    pub language: String,
}

impl SelectionContext {
    /// No product selected.
    pub fn none(language: impl Into<String>) -> Self {
        Self {
            collection: Collection::none(),
            version: String::new(),
            language: language.into(),
        }
    }

    pub fn new(
        collection: Collection,
        version: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            collection,
            version: version.into(),
            language: language.into(),
        }
    }

    /// Build the single query shared by every session for one submission.
    pub fn build_query(&self, text: &str) -> Query {
        Query {
            collection: self.collection.collection_id(&self.version),
            collection_full_name: self.collection.collection_full_name.clone(),
            version: self.version.clone(),
            language: self.language.clone(),
            ..Query::new(text)
        }
    }
}

/// What happened to one broadcast, per session.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Sessions that accepted the action.
    pub delivered: Vec<SessionId>,
    /// Sessions that showed the empty-query notice instead of sending.
    pub empty: Vec<SessionId>,
    /// Sessions that refused; delivery to the rest went ahead.
    pub failed: Vec<(SessionId, SessionError)>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, id: SessionId, action: &str, result: Result<()>) {
        match result {
            Ok(()) => self.delivered.push(id),
            Err(e) => {
                warn!(
                    session = %id,
                    action,
                    code = e.error_code(),
                    error = %e,
                    "session refused broadcast"
                );
                self.failed.push((id, e));
            }
        }
    }
}

/// Send one query built from `text` to every session, in registry order.
pub fn submit(
    registry: &mut SessionRegistry,
    context: &SelectionContext,
    text: &str,
) -> DispatchReport {
    let query = context.build_query(text);
    let mut report = DispatchReport::default();

    for session in registry.iter_mut() {
        let id = session.id();
        match session.send_query(&query) {
            Ok(SendOutcome::Sent) => report.delivered.push(id),
            Ok(SendOutcome::EmptyQuery) => report.empty.push(id),
            Err(e) => report.record(id, "submit", Err(e)),
        }
    }

    debug!(
        delivered = report.delivered.len(),
        empty = report.empty.len(),
        failed = report.failed.len(),
        "query dispatched"
    );
    report
}

/// Announce the selection in `context` to every session.
pub fn broadcast_context_change(
    registry: &mut SessionRegistry,
    context: &SelectionContext,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for session in registry.iter_mut() {
        let id = session.id();
        let result = session.change_context(&context.collection, &context.version);
        report.record(id, "change_context", result);
    }
    debug!(
        collection = %context.collection.collection_base_name,
        version = %context.version,
        delivered = report.delivered.len(),
        "context change broadcast"
    );
    report
}

pub fn reset_all(registry: &mut SessionRegistry) -> DispatchReport {
    let mut report = DispatchReport::default();
    for session in registry.iter_mut() {
        let id = session.id();
        let result = session.reset_history();
        report.record(id, "reset", result);
    }
    report
}
