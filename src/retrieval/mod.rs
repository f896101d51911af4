//! Retrieval client port and upstream implementations.
//!
//! Each upstream source is consumed through the narrow [`RetrievalClient`]
//! trait: call a named tool with JSON parameters, get back raw records plus
//! a transport diagnostic. Transport failures never escape as errors — they
//! fold into the diagnostic so agents can apply a uniform retry policy.
//!
//! Implementations must enforce the per-call deadline, bound payload sizes
//! (oversized text is truncated, never silently expanded), and be safe to
//! share across concurrent requests behind an `Arc`.

pub mod jsonrpc;
pub mod rest;
pub mod vector;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RetrievalError;

pub use jsonrpc::DrugRegistryClient;
pub use rest::LiteratureClient;
pub use vector::GuidelineStore;

/// Maximum aggregate payload size per tool call, in bytes.
pub const MAX_AGGREGATE_BYTES: usize = 1024 * 1024;

/// Maximum size of any single text field, in bytes.
pub const MAX_TEXT_FIELD_BYTES: usize = 100 * 1024;

/// Transport-level diagnostic attached to every tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// The call succeeded and returned records.
    Ok,
    /// The call succeeded but matched nothing.
    Empty,
    /// The call failed in a way worth retrying (network, 5xx, timeout).
    Transient,
    /// The call failed permanently (bad request, unknown tool).
    Permanent,
}

/// Health signal reported by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Upstream reachable and serving.
    Available,
    /// Upstream reachable but impaired.
    Degraded,
    /// Upstream unreachable or refusing service.
    Unavailable,
}

impl Health {
    /// Returns the wire representation of the health state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Result of one tool call against an upstream.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Raw records returned by the upstream, bounded per the port contract.
    pub records: Vec<Value>,
    /// Transport diagnostic for this call.
    pub diagnostic: Diagnostic,
    /// Optional diagnostic detail (logged, never shown to clients).
    pub detail: Option<String>,
}

impl ToolResult {
    /// Builds a success result, deriving `Ok`/`Empty` from the record count
    /// and applying payload bounds.
    #[must_use]
    pub fn from_records(records: Vec<Value>) -> Self {
        let records = bound_records(records);
        let diagnostic = if records.is_empty() {
            Diagnostic::Empty
        } else {
            Diagnostic::Ok
        };
        Self {
            records,
            diagnostic,
            detail: None,
        }
    }

    /// Builds a failure result from an internal retrieval error.
    #[must_use]
    pub fn from_error(err: &RetrievalError) -> Self {
        let diagnostic = match err {
            RetrievalError::Transport { .. } | RetrievalError::Timeout => Diagnostic::Transient,
            RetrievalError::Rejected { .. } | RetrievalError::NotConfigured { .. } => {
                Diagnostic::Permanent
            }
        };
        Self {
            records: Vec::new(),
            diagnostic,
            detail: Some(err.to_string()),
        }
    }
}

/// Abstract access to one upstream source.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Client name for logging and the health endpoint.
    fn name(&self) -> &'static str;

    /// Calls a named tool with JSON parameters.
    ///
    /// Never returns an error: transport failures are reported through the
    /// result's [`Diagnostic`] so callers apply one retry policy everywhere.
    async fn call_tool(&self, tool: &str, params: Value) -> ToolResult;

    /// Probes upstream health.
    async fn health_check(&self) -> Health;

    /// Releases held resources. Default is a no-op.
    async fn close(&self) {}
}

/// Truncates a string to at most `max` bytes on a char boundary.
fn truncate_on_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Truncates every string field in a JSON value to the per-field bound.
fn bound_value(value: &mut Value) {
    match value {
        Value::String(s) => truncate_on_boundary(s, MAX_TEXT_FIELD_BYTES),
        Value::Array(items) => {
            for item in items {
                bound_value(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                bound_value(v);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Applies the port payload bounds: per-field truncation first, then an
/// aggregate cap that drops whole trailing records.
fn bound_records(mut records: Vec<Value>) -> Vec<Value> {
    let mut total = 0usize;
    let mut kept = 0usize;

    for record in &mut records {
        bound_value(record);
        let size = record.to_string().len();
        if total + size > MAX_AGGREGATE_BYTES {
            break;
        }
        total += size;
        kept += 1;
    }

    if kept < records.len() {
        tracing::warn!(
            dropped = records.len() - kept,
            "aggregate payload bound exceeded, dropping trailing records"
        );
        records.truncate(kept);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_ok_and_empty() {
        let ok = ToolResult::from_records(vec![json!({"name": "Metformin"})]);
        assert_eq!(ok.diagnostic, Diagnostic::Ok);
        assert_eq!(ok.records.len(), 1);

        let empty = ToolResult::from_records(vec![]);
        assert_eq!(empty.diagnostic, Diagnostic::Empty);
        assert!(empty.records.is_empty());
    }

    #[test]
    fn test_tool_result_from_error() {
        let transient = ToolResult::from_error(&RetrievalError::Timeout);
        assert_eq!(transient.diagnostic, Diagnostic::Transient);

        let permanent = ToolResult::from_error(&RetrievalError::Rejected {
            message: "unknown tool".to_string(),
        });
        assert_eq!(permanent.diagnostic, Diagnostic::Permanent);
        assert!(permanent.detail.is_some());
    }

    #[test]
    fn test_text_field_truncation() {
        let big = "x".repeat(MAX_TEXT_FIELD_BYTES + 500);
        let result = ToolResult::from_records(vec![json!({"content": big})]);
        let content = result.records[0]["content"].as_str().unwrap_or_default();
        assert_eq!(content.len(), MAX_TEXT_FIELD_BYTES);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let mut s = "é".repeat(10);
        truncate_on_boundary(&mut s, 3);
        // "é" is two bytes; 3 is mid-char, so we back off to 2.
        assert_eq!(s.len(), 2);
        assert_eq!(s, "é");
    }

    #[test]
    fn test_aggregate_bound_drops_trailing_records() {
        let chunk = "y".repeat(MAX_TEXT_FIELD_BYTES);
        let records: Vec<Value> = (0..20).map(|_| json!({"content": chunk})).collect();
        let bounded = bound_records(records);
        assert!(bounded.len() < 20);
        assert!(!bounded.is_empty());
    }

    #[test]
    fn test_health_wire_names() {
        assert_eq!(Health::Available.as_str(), "available");
        assert_eq!(Health::Degraded.as_str(), "degraded");
        assert_eq!(Health::Unavailable.as_str(), "unavailable");
    }
}
