//! Wire messages exchanged with the answering backend.
//!
//! One JSON object per WebSocket text frame in each direction.

use serde::{Deserialize, Serialize};

use crate::types::Query;

/// Score assigned to a source event that carries no score. Finite so that it
/// serializes, and worse than any real similarity distance.
pub const UNSCORED: f64 = f64::MAX;

/// Request sent once per successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub model: String,
    pub query: String,
    pub collection: String,
    pub collection_full_name: String,
    pub version: String,
    pub language: String,
}

impl OutboundRequest {
    pub fn new(model: &str, query: &Query) -> Self {
        Self {
            model: model.to_string(),
            query: query.content.clone(),
            collection: query.collection.clone(),
            collection_full_name: query.collection_full_name.clone(),
            version: query.version.clone(),
            language: query.language.clone(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Event streamed back by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Token {
        token: String,
    },
    Source {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<f64>,
    },
    /// Any event type this client does not know about.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
