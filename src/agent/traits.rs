//! Specialist agent trait and the shared retry policy.
//!
//! All agents (drug, literature, guideline, general) implement this trait,
//! which gives the dispatcher a uniform interface. Agents absorb every
//! failure into their result; nothing they do can abort the workflow.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::document::{AgentResult, FailureKind};
use super::query::{AgentId, SubQuery};
use crate::retrieval::{Diagnostic, RetrievalClient, ToolResult};

/// First backoff delay after a transient failure.
const RETRY_BASE: Duration = Duration::from_millis(200);
/// Upper bound on a single backoff delay.
const RETRY_CAP: Duration = Duration::from_secs(2);
/// Maximum retries after the initial attempt.
const MAX_RETRIES: u32 = 2;

/// Trait implemented by all specialist agents.
///
/// An agent translates its typed sub-query into tool calls against one
/// retrieval client and wraps the records as documents with provisional
/// citation indices.
#[async_trait]
pub trait SpecialistAgent: Send + Sync {
    /// The agent's identifier.
    fn id(&self) -> AgentId;

    /// Executes the sub-query within the remaining workflow budget.
    ///
    /// Never fails: timeouts, upstream errors, and missing clients all
    /// collapse into a `Failed` [`AgentResult`].
    async fn run(&self, query: &SubQuery, budget: Duration) -> AgentResult;
}

/// Calls a tool with the shared retry policy.
///
/// Transient diagnostics retry up to twice with exponential backoff
/// (base 200 ms, cap 2 s). Retries consume the remaining budget, not a
/// fresh one; when the budget runs out mid-policy the failure kind is
/// `Timeout` rather than `Upstream`.
pub(crate) async fn call_with_retry(
    client: &dyn RetrievalClient,
    tool: &str,
    params: Value,
    budget: Duration,
) -> Result<ToolResult, FailureKind> {
    let deadline = Instant::now() + budget;

    for attempt in 0..=MAX_RETRIES {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(FailureKind::Timeout);
        }

        let outcome = tokio::time::timeout(remaining, client.call_tool(tool, params.clone())).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => return Err(FailureKind::Timeout),
        };

        match result.diagnostic {
            Diagnostic::Ok | Diagnostic::Empty => return Ok(result),
            Diagnostic::Transient if attempt < MAX_RETRIES => {
                let backoff = RETRY_BASE
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(RETRY_CAP);
                let remaining = deadline.saturating_duration_since(Instant::now());
                if backoff >= remaining {
                    return Err(FailureKind::Timeout);
                }
                tracing::debug!(
                    tool,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
            Diagnostic::Transient | Diagnostic::Permanent => return Err(FailureKind::Upstream),
        }
    }

    Err(FailureKind::Upstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Health;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Client whose first `fail_times` calls are transient failures.
    struct FlakyClient {
        calls: AtomicU32,
        fail_times: u32,
        terminal: Diagnostic,
    }

    impl FlakyClient {
        fn new(fail_times: u32, terminal: Diagnostic) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_times,
                terminal,
            }
        }
    }

    #[async_trait]
    impl RetrievalClient for FlakyClient {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn call_tool(&self, _tool: &str, _params: Value) -> ToolResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let diagnostic = if n < self.fail_times {
                Diagnostic::Transient
            } else {
                self.terminal
            };
            ToolResult {
                records: if diagnostic == Diagnostic::Ok {
                    vec![serde_json::json!({"ok": true})]
                } else {
                    Vec::new()
                },
                diagnostic,
                detail: None,
            }
        }

        async fn health_check(&self) -> Health {
            Health::Available
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient() {
        let client = FlakyClient::new(2, Diagnostic::Ok);
        let result =
            call_with_retry(&client, "search", Value::Null, Duration::from_secs(10)).await;
        assert!(result.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_upstream() {
        let client = FlakyClient::new(10, Diagnostic::Ok);
        let result =
            call_with_retry(&client, "search", Value::Null, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(FailureKind::Upstream)));
        // Initial attempt + two retries, never more.
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_fails_without_retry() {
        let client = FlakyClient::new(0, Diagnostic::Permanent);
        let result =
            call_with_retry(&client, "search", Value::Null, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(FailureKind::Upstream)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_timeout() {
        let client = FlakyClient::new(10, Diagnostic::Ok);
        // Budget too small for even one 200 ms backoff.
        let result =
            call_with_retry(&client, "search", Value::Null, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(FailureKind::Timeout)));
    }
}
