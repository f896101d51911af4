//! Parallel dispatch of a plan across specialist agents.
//!
//! All plan entries launch concurrently under one shared deadline; results
//! collect in plan order so citation numbering stays deterministic across
//! retries of the same query. Individual agent failures never fail the
//! dispatcher — only the aggregate (every agent failed) is reported upward.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::document::{AgentResult, AgentStatus, FailureKind};
use crate::agent::query::{AgentId, DispatchPlan};
use crate::agent::traits::SpecialistAgent;
use crate::events::LifecycleEvent;

/// The set of constructed agents, one per identifier.
pub struct AgentSet {
    /// Drug registry agent.
    pub drug: Arc<dyn SpecialistAgent>,
    /// Literature agent.
    pub literature: Arc<dyn SpecialistAgent>,
    /// Guideline agent.
    pub guideline: Arc<dyn SpecialistAgent>,
    /// General fallback agent.
    pub general: Arc<dyn SpecialistAgent>,
}

impl AgentSet {
    /// Looks up the agent for an identifier.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Arc<dyn SpecialistAgent> {
        match id {
            AgentId::Drug => Arc::clone(&self.drug),
            AgentId::Literature => Arc::clone(&self.literature),
            AgentId::Guideline => Arc::clone(&self.guideline),
            AgentId::General => Arc::clone(&self.general),
        }
    }
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSet").finish_non_exhaustive()
    }
}

/// Fan-out/fan-in executor for dispatch plans.
pub struct Dispatcher {
    agents: AgentSet,
}

impl Dispatcher {
    /// Creates a dispatcher over the given agents.
    #[must_use]
    pub const fn new(agents: AgentSet) -> Self {
        Self { agents }
    }

    /// Runs every plan entry concurrently under one deadline.
    ///
    /// Emits `agent_start` per entry in invocation order before any tool
    /// call, and `agent_complete` from each task the moment its result is
    /// fixed. Results return in plan order. An entry that overruns the
    /// deadline or observes cancellation becomes `failed/timeout`; partial
    /// results are expected, not exceptional.
    pub async fn run(
        &self,
        plan: &DispatchPlan,
        deadline: Duration,
        events: &mpsc::Sender<LifecycleEvent>,
        cancel: &CancellationToken,
    ) -> Vec<(AgentId, AgentResult)> {
        let mut handles = Vec::with_capacity(plan.entries.len());

        for entry in &plan.entries {
            let _ = events
                .send(LifecycleEvent::AgentStart {
                    agent: entry.agent.as_str().to_string(),
                })
                .await;

            let agent = self.agents.get(entry.agent);
            let query = entry.query.clone();
            let events = events.clone();
            let token = cancel.child_token();
            let id = entry.agent;

            let handle = tokio::spawn(async move {
                let result = tokio::select! {
                    () = token.cancelled() => AgentResult::failed(FailureKind::Timeout),
                    run = tokio::time::timeout(deadline, agent.run(&query, deadline)) => {
                        run.unwrap_or_else(|_| AgentResult::failed(FailureKind::Timeout))
                    }
                };

                // The receiver may be gone when the client disconnected;
                // the result still flows back through the join handle.
                let _ = events
                    .send(LifecycleEvent::AgentComplete {
                        agent: id.as_str().to_string(),
                    })
                    .await;

                result
            });

            handles.push((id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(agent = %id, error = %err, "agent task join failed");
                    AgentResult::failed(FailureKind::Internal)
                }
            };
            tracing::debug!(
                agent = %id,
                status = ?result.status,
                documents = result.documents.len(),
                "agent finished"
            );
            results.push((id, result));
        }

        results
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Whether every agent in the result set failed.
///
/// The dispatcher itself tolerates any partial failure; this predicate is
/// how the workflow decides to produce the graceful-degradation answer.
#[must_use]
pub fn all_failed(results: &[(AgentId, AgentResult)]) -> bool {
    !results.is_empty()
        && results
            .iter()
            .all(|(_, r)| r.status == AgentStatus::Failed)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::document::{Document, Source};
    use crate::agent::query::{DrugIntent, PlanEntry, RouteDecision, SubQuery};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Agent that sleeps, then returns one document (or fails).
    struct StubAgent {
        id: AgentId,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl SpecialistAgent for StubAgent {
        fn id(&self) -> AgentId {
            self.id
        }

        async fn run(&self, _query: &SubQuery, _budget: Duration) -> AgentResult {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return AgentResult::failed(FailureKind::Upstream);
            }
            AgentResult::ok(vec![Document {
                content: format!("doc from {}", self.id),
                source: Source::Drug,
                source_meta: BTreeMap::new(),
                provisional_index: 1,
            }])
        }
    }

    fn agent_set(drug_delay: Duration, drug_fail: bool) -> AgentSet {
        AgentSet {
            drug: Arc::new(StubAgent {
                id: AgentId::Drug,
                delay: drug_delay,
                fail: drug_fail,
            }),
            literature: Arc::new(StubAgent {
                id: AgentId::Literature,
                delay: Duration::ZERO,
                fail: false,
            }),
            guideline: Arc::new(StubAgent {
                id: AgentId::Guideline,
                delay: Duration::ZERO,
                fail: false,
            }),
            general: Arc::new(StubAgent {
                id: AgentId::General,
                delay: Duration::ZERO,
                fail: false,
            }),
        }
    }

    fn two_agent_plan() -> DispatchPlan {
        DispatchPlan {
            entries: vec![
                PlanEntry {
                    agent: AgentId::Drug,
                    query: SubQuery::Drug {
                        term: "metformin".to_string(),
                        intent: DrugIntent::Info,
                    },
                },
                PlanEntry {
                    agent: AgentId::Literature,
                    query: SubQuery::Research {
                        term: "metformin".to_string(),
                        filters: crate::agent::query::ResearchFilters::default(),
                        language: "cs".to_string(),
                    },
                },
            ],
            decided_by: RouteDecision::Keyword,
        }
    }

    fn drain(mut rx: mpsc::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_results_in_plan_order() {
        let dispatcher = Dispatcher::new(agent_set(Duration::from_millis(50), false));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let results = dispatcher
            .run(&two_agent_plan(), Duration::from_secs(5), &tx, &cancel)
            .await;

        // Drug is slower but still comes first: plan order, not completion order.
        assert_eq!(results[0].0, AgentId::Drug);
        assert_eq!(results[1].0, AgentId::Literature);
        assert_eq!(results[0].1.status, AgentStatus::Ok);
        drop(tx);
        let _ = drain(rx);
    }

    #[tokio::test]
    async fn test_start_precedes_complete_per_agent() {
        let dispatcher = Dispatcher::new(agent_set(Duration::ZERO, false));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let _ = dispatcher
            .run(&two_agent_plan(), Duration::from_secs(5), &tx, &cancel)
            .await;
        drop(tx);
        let events = drain(rx);

        for agent in ["drug", "literature"] {
            let start = events.iter().position(|e| {
                matches!(e, LifecycleEvent::AgentStart { agent: a } if a == agent)
            });
            let complete = events.iter().position(|e| {
                matches!(e, LifecycleEvent::AgentComplete { agent: a } if a == agent)
            });
            let (Some(start), Some(complete)) = (start, complete) else {
                panic!("missing events for {agent}: {events:?}");
            };
            assert!(start < complete, "start must precede complete for {agent}");
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_survivors() {
        let dispatcher = Dispatcher::new(agent_set(Duration::ZERO, true));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let results = dispatcher
            .run(&two_agent_plan(), Duration::from_secs(5), &tx, &cancel)
            .await;

        assert_eq!(results[0].1.status, AgentStatus::Failed);
        assert_eq!(results[1].1.status, AgentStatus::Ok);
        assert!(!all_failed(&results));
        drop(tx);
        let _ = drain(rx);
    }

    #[tokio::test]
    async fn test_deadline_turns_slow_agent_into_timeout() {
        let dispatcher = Dispatcher::new(agent_set(Duration::from_secs(30), false));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let results = dispatcher
            .run(&two_agent_plan(), Duration::from_millis(100), &tx, &cancel)
            .await;

        assert_eq!(results[0].1.status, AgentStatus::Failed);
        assert_eq!(results[0].1.error_kind, Some(FailureKind::Timeout));
        assert_eq!(results[1].1.status, AgentStatus::Ok);
        drop(tx);
        let _ = drain(rx);
    }

    #[tokio::test]
    async fn test_all_failed_predicate() {
        assert!(!all_failed(&[]));
        let failed = (AgentId::Drug, AgentResult::failed(FailureKind::Upstream));
        let ok = (
            AgentId::Literature,
            AgentResult::ok(vec![Document {
                content: "x".to_string(),
                source: Source::Literature,
                source_meta: BTreeMap::new(),
                provisional_index: 1,
            }]),
        );
        assert!(all_failed(&[failed.clone()]));
        assert!(!all_failed(&[failed, ok]));
    }
}
