//! Drug agent over the pharmaceutical registry.
//!
//! Translates a [`SubQuery::Drug`] into registry tool calls: always a
//! `search`, plus a `details` or `reimbursement` follow-up when the intent
//! asks for it and the search surfaced a registration number.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::document::{AgentResult, Document, FailureKind, Source};
use super::query::{AgentId, DrugIntent, SubQuery};
use super::traits::{SpecialistAgent, call_with_retry};
use crate::retrieval::RetrievalClient;

/// Record fields used as document content, in preference order.
const CONTENT_KEYS: &[&str] = &["summary", "indication", "text", "content"];

/// Record fields copied into citation metadata.
const META_KEYS: &[&str] = &[
    "registration_number",
    "name",
    "holder",
    "atc_group",
    "supplement",
    "price",
    "reimbursement",
    "url",
];

/// Agent bound to the pharmaceutical registry.
pub struct DrugAgent {
    client: Option<Arc<dyn RetrievalClient>>,
}

impl DrugAgent {
    /// Creates the agent. A `None` client makes every run report
    /// `failed/unavailable` instead of panicking.
    #[must_use]
    pub fn new(client: Option<Arc<dyn RetrievalClient>>) -> Self {
        Self { client }
    }

    /// Picks the follow-up tool for the intent, if any.
    const fn follow_up_tool(intent: DrugIntent) -> Option<&'static str> {
        match intent {
            DrugIntent::Info => None,
            DrugIntent::Details => Some("details"),
            DrugIntent::Reimbursement => Some("reimbursement"),
        }
    }
}

#[async_trait]
impl SpecialistAgent for DrugAgent {
    fn id(&self) -> AgentId {
        AgentId::Drug
    }

    async fn run(&self, query: &SubQuery, budget: Duration) -> AgentResult {
        let SubQuery::Drug { term, intent } = query else {
            return AgentResult::failed(FailureKind::Internal);
        };
        let Some(client) = &self.client else {
            return AgentResult::failed(FailureKind::Unavailable);
        };

        let deadline = Instant::now() + budget;

        let search = match call_with_retry(
            client.as_ref(),
            "search",
            json!({ "term": term }),
            deadline.saturating_duration_since(Instant::now()),
        )
        .await
        {
            Ok(result) => result,
            Err(kind) => return AgentResult::failed(kind),
        };

        let mut documents: Vec<Document> = search
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                Document::from_record(record, Source::Drug, i + 1, CONTENT_KEYS, META_KEYS)
            })
            .collect();

        // Follow-up fetch for the first hit's registration number. A failed
        // follow-up degrades to search-only output rather than failing the
        // agent; the search documents are already in hand.
        if let Some(tool) = Self::follow_up_tool(*intent)
            && let Some(registration_number) = search
                .records
                .first()
                .and_then(|r| r.get("registration_number"))
                .and_then(Value::as_str)
        {
            match call_with_retry(
                client.as_ref(),
                tool,
                json!({ "registration_number": registration_number }),
                deadline.saturating_duration_since(Instant::now()),
            )
            .await
            {
                Ok(detail) => {
                    let offset = documents.len();
                    documents.extend(detail.records.iter().enumerate().map(|(i, record)| {
                        Document::from_record(
                            record,
                            Source::Drug,
                            offset + i + 1,
                            CONTENT_KEYS,
                            META_KEYS,
                        )
                    }));
                }
                Err(kind) => {
                    tracing::warn!(tool, ?kind, "drug follow-up call failed, keeping search hits");
                }
            }
        }

        AgentResult::ok(documents)
    }
}
