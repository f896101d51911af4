//! Documents and agent results.
//!
//! A [`Document`] is the unit of citation: one retrieved record with its
//! content, source tag, and source-specific metadata. Agents number their
//! own documents provisionally; the synthesizer discards those indices
//! when it assigns global citation numbers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Upstream source a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Pharmaceutical registry.
    Drug,
    /// Biomedical literature service.
    Literature,
    /// Guideline corpus.
    Guideline,
    /// Direct model answer (general agent); carries no citation metadata.
    General,
}

impl Source {
    /// Returns the wire representation of the source tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drug => "drug",
            Self::Literature => "literature",
            Self::Guideline => "guideline",
            Self::General => "general",
        }
    }
}

/// A single retrieved record, the unit of citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The substance to cite.
    pub content: String,
    /// Which upstream produced this record.
    pub source: Source,
    /// Source-specific attributes (registration number, pmid, url, ...).
    /// An open string mapping; the core attaches it to citations and never
    /// interprets it.
    #[serde(default)]
    pub source_meta: BTreeMap<String, String>,
    /// Per-agent citation index, unique within the producing agent's
    /// output only. Starts at 1. Discarded after global renumbering.
    pub provisional_index: usize,
}

impl Document {
    /// Builds a document from a raw upstream record.
    ///
    /// Content comes from the first of `content_keys` present as a string;
    /// when none matches, the whole record serializes as content so nothing
    /// retrievable is ever dropped. Scalar values under `meta_keys` land in
    /// `source_meta` stringified.
    #[must_use]
    pub fn from_record(
        record: &serde_json::Value,
        source: Source,
        provisional_index: usize,
        content_keys: &[&str],
        meta_keys: &[&str],
    ) -> Self {
        let content = content_keys
            .iter()
            .find_map(|key| record.get(key).and_then(serde_json::Value::as_str))
            .map_or_else(|| record.to_string(), ToString::to_string);

        let mut source_meta = BTreeMap::new();
        for key in meta_keys {
            let Some(value) = record.get(key) else {
                continue;
            };
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            source_meta.insert((*key).to_string(), text);
        }

        Self {
            content,
            source,
            source_meta,
            provisional_index,
        }
    }
}

/// Outcome status of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// The agent produced at least one document.
    Ok,
    /// The agent ran but matched nothing.
    Empty,
    /// The agent could not produce documents.
    Failed,
}

/// Why an agent failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The upstream rejected the call or retries exhausted.
    Upstream,
    /// The call exceeded its deadline.
    Timeout,
    /// The agent has no retrieval client configured.
    Unavailable,
    /// A fault inside the agent itself.
    Internal,
}

/// Result of one agent invocation.
///
/// Agents never propagate errors upward; every failure mode collapses into
/// a `Failed` result so the dispatcher can tolerate any subset of failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Documents produced, in provisional-index order.
    pub documents: Vec<Document>,
    /// Outcome status.
    pub status: AgentStatus,
    /// Failure classification when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl AgentResult {
    /// Builds a success result; an empty document list downgrades to `Empty`.
    #[must_use]
    pub fn ok(documents: Vec<Document>) -> Self {
        if documents.is_empty() {
            return Self::empty();
        }
        Self {
            documents,
            status: AgentStatus::Ok,
            error_kind: None,
        }
    }

    /// Builds an empty result.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            documents: Vec::new(),
            status: AgentStatus::Empty,
            error_kind: None,
        }
    }

    /// Builds a failure result.
    #[must_use]
    pub const fn failed(kind: FailureKind) -> Self {
        Self {
            documents: Vec::new(),
            status: AgentStatus::Failed,
            error_kind: Some(kind),
        }
    }
}
