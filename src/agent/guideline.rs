//! Guideline agent over the indexed guideline corpus.
//!
//! A thin wrapper: one semantic-similarity `search` call, records wrapped
//! as guideline documents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::document::{AgentResult, Document, FailureKind, Source};
use super::query::{AgentId, SubQuery};
use super::traits::{SpecialistAgent, call_with_retry};
use crate::retrieval::RetrievalClient;

/// Record fields used as document content, in preference order.
const CONTENT_KEYS: &[&str] = &["content", "text"];

/// Record fields copied into citation metadata.
const META_KEYS: &[&str] = &["document_id", "title", "section", "url"];

/// Agent bound to the guideline corpus.
pub struct GuidelineAgent {
    client: Option<Arc<dyn RetrievalClient>>,
}

impl GuidelineAgent {
    /// Creates the agent. A `None` client makes every run report
    /// `failed/unavailable` instead of panicking.
    #[must_use]
    pub fn new(client: Option<Arc<dyn RetrievalClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpecialistAgent for GuidelineAgent {
    fn id(&self) -> AgentId {
        AgentId::Guideline
    }

    async fn run(&self, query: &SubQuery, budget: Duration) -> AgentResult {
        let SubQuery::Guideline { term } = query else {
            return AgentResult::failed(FailureKind::Internal);
        };
        let Some(client) = &self.client else {
            return AgentResult::failed(FailureKind::Unavailable);
        };

        let search = match call_with_retry(
            client.as_ref(),
            "search",
            json!({ "term": term }),
            budget,
        )
        .await
        {
            Ok(result) => result,
            Err(kind) => return AgentResult::failed(kind),
        };

        let documents = search
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                Document::from_record(record, Source::Guideline, i + 1, CONTENT_KEYS, META_KEYS)
            })
            .collect();

        AgentResult::ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::document::AgentStatus;
    use crate::retrieval::{Health, ToolResult};
    use serde_json::Value;

    struct CannedCorpus {
        records: Vec<Value>,
    }

    #[async_trait]
    impl RetrievalClient for CannedCorpus {
        fn name(&self) -> &'static str {
            "guideline"
        }

        async fn call_tool(&self, _tool: &str, _params: Value) -> ToolResult {
            ToolResult::from_records(self.records.clone())
        }

        async fn health_check(&self) -> Health {
            Health::Available
        }
    }

    #[tokio::test]
    async fn test_search_wraps_guideline_documents() {
        let client = Arc::new(CannedCorpus {
            records: vec![json!({
                "document_id": "esc-2024-7",
                "title": "Hypertenze",
                "section": "4.2",
                "content": "Cílový tlak pod 140/90",
            })],
        });
        let agent = GuidelineAgent::new(Some(client as Arc<dyn RetrievalClient>));
        let result = agent
            .run(
                &SubQuery::Guideline {
                    term: "hypertenze".to_string(),
                },
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(result.status, AgentStatus::Ok);
        assert_eq!(result.documents[0].source, Source::Guideline);
        assert_eq!(result.documents[0].content, "Cílový tlak pod 140/90");
        assert_eq!(
            result.documents[0].source_meta.get("document_id").map(String::as_str),
            Some("esc-2024-7")
        );
    }

    #[tokio::test]
    async fn test_missing_client_is_unavailable() {
        let agent = GuidelineAgent::new(None);
        let result = agent
            .run(
                &SubQuery::Guideline {
                    term: "hypertenze".to_string(),
                },
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert_eq!(result.error_kind, Some(FailureKind::Unavailable));
    }
}
