//! Lifecycle events and the final payload.
//!
//! Components inside a request write these to a bounded internal channel;
//! the gateway is the only writer of the external SSE stream and serializes
//! them in arrival order. Payload shapes here are the wire contract: each
//! event's `data()` is exactly what goes into the SSE `data:` line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agent::document::Document;
use crate::error::ErrorTag;

/// One retrieved document as presented to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    /// Document content.
    pub content: String,
    /// Source tag plus the source-specific attributes, flattened.
    pub metadata: BTreeMap<String, String>,
}

impl RetrievedDoc {
    /// Builds the client view of a document: `source` joins the open
    /// metadata mapping, nothing else is interpreted.
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        let mut metadata = doc.source_meta.clone();
        metadata.insert("source".to_string(), doc.source.as_str().to_string());
        Self {
            content: doc.content.clone(),
            metadata,
        }
    }
}

/// Payload of the `final` event; also the unit the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    /// The synthesized answer with inline `[K]` citations.
    pub answer: String,
    /// Documents in global citation order (position K-1 backs `[K]`).
    pub retrieved_docs: Vec<RetrievedDoc>,
    /// Reserved; always `null` until a later design round populates it.
    pub confidence: Option<f64>,
    /// End-to-end processing time of the producing request.
    pub latency_ms: u64,
}

/// A lifecycle event on one request's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// An agent (or the synthesizer) began work.
    AgentStart {
        /// Agent name on the wire.
        agent: String,
    },
    /// An agent's result is fixed.
    AgentComplete {
        /// Agent name on the wire.
        agent: String,
    },
    /// The cache answered this request.
    CacheHit,
    /// The final answer.
    Final(FinalPayload),
    /// Terminal success marker.
    Done,
    /// Terminal failure; suppresses everything after it.
    Error {
        /// Taxonomy tag.
        error: ErrorTag,
        /// Client-safe detail.
        detail: String,
    },
}

impl LifecycleEvent {
    /// SSE event name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentComplete { .. } => "agent_complete",
            Self::CacheHit => "cache_hit",
            Self::Final(_) => "final",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// SSE data payload, shaped per the client protocol.
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::AgentStart { agent } => json!({"type": "agent_start", "agent": agent}),
            Self::AgentComplete { agent } => json!({"type": "agent_complete", "agent": agent}),
            Self::CacheHit => json!({"type": "cache_hit"}),
            Self::Final(payload) => {
                let mut value = serde_json::to_value(payload).unwrap_or_else(|_| json!({}));
                if let Some(map) = value.as_object_mut() {
                    map.insert("type".to_string(), json!("final"));
                }
                value
            }
            Self::Done => json!({}),
            Self::Error { error, detail } => {
                json!({"type": "error", "error": error.as_str(), "detail": detail})
            }
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
