//! # Stream Session
//!
//! Engine behind a multi-pane streaming chat client: one question is broadcast
//! to several answering agents, each streaming its reply back over its own
//! long-lived connection.
//!
//! ## Overview
//!
//! - [`StreamingSession`]: per-pane state machine. Accumulates token fragments
//!   and citations into the in-flight [`Answer`], keeps an append-only
//!   [`History`], and tracks time to first token and tokens per second.
//! - [`SessionRegistry`]: ordered, bounded set of sessions plus the
//!   [`Connector`] that opens their streams.
//! - [`dispatch`]: fans one query, context change or reset out to every
//!   session, isolating per-session failures.
//! - [`ws`] (feature `ws`, on by default): WebSocket transport on
//!   `tokio-tungstenite`.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting --Opened--> Idle --send_query--> Streaming --change_context--+
//!      ^                  ^                      |    ^                   |
//!      |                  +--------reset---------+    +-------------------+
//!      +--Reconnecting--- any ---Closed/close()---> Closed
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use stream_session::{
//!     dispatch, MessageTemplates, RecordingConnector, SelectionContext, SessionRegistry,
//!     TransportEvent,
//! };
//!
//! let connector = RecordingConnector::new();
//! let mut registry = SessionRegistry::new(
//!     Box::new(connector.clone()),
//!     4,
//!     Arc::new(MessageTemplates::default()),
//! );
//! let id = registry.add_session().unwrap();
//! registry.handle_event(id, TransportEvent::Opened).unwrap();
//!
//! let report = dispatch::submit(&mut registry, &SelectionContext::none("en"), "hello");
//! assert_eq!(report.delivered, vec![id]);
//! assert_eq!(connector.sent(id).len(), 1);
//! ```
//!
//! Sessions never block: outbound frames are queued on the connection and
//! inbound data comes back as [`TransportEvent`]s which the caller feeds to
//! [`SessionRegistry::handle_event`], one at a time, in arrival order.

pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sources;
pub mod templates;
pub mod transport;
pub mod types;
#[cfg(feature = "ws")]
pub mod ws;

pub use dispatch::{DispatchReport, SelectionContext};
pub use error::{Result, SessionError};
pub use metrics::{MetricsSnapshot, TurnMetrics};
pub use protocol::{InboundEvent, OutboundRequest};
pub use registry::{DEFAULT_MAX_SESSIONS, SessionRegistry};
pub use session::{SendOutcome, SessionState, StreamingSession, Transcript};
pub use templates::MessageTemplates;
pub use transport::{
    ConnectionLog, Connection, Connector, ReconnectPolicy, RecordingConnector, TransportEvent,
};
pub use types::{
    Answer, Collection, CollectionVersion, History, MessageEntry, ModelInfo, NONE_COLLECTION,
    Query, SessionId, Source,
};
