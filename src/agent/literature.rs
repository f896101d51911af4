//! Literature agent over the biomedical literature service.
//!
//! The service indexes English text, while the consulting user usually asks
//! in another language. Both directions of translation live here, inside
//! the agent, as ordinary chat calls: the query is translated before the
//! search and each document's content after it. Translation failures
//! degrade to the untranslated text instead of failing the agent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use super::document::{AgentResult, Document, FailureKind, Source};
use super::query::{AgentId, ResearchFilters, SubQuery};
use super::traits::{SpecialistAgent, call_with_retry};
use crate::chat::{ChatClient, ChatRequest, message};
use crate::prompt::build_translation_prompt;
use crate::retrieval::RetrievalClient;

/// Language the literature source expects.
const SOURCE_LANGUAGE: &str = "en";

/// Default cap on returned publications.
const DEFAULT_MAX_RESULTS: u32 = 5;

/// Maximum tokens for a translation call.
const TRANSLATION_MAX_TOKENS: u32 = 1024;

/// Record fields used as document content, in preference order.
const CONTENT_KEYS: &[&str] = &["abstract", "summary", "title"];

/// Record fields copied into citation metadata.
const META_KEYS: &[&str] = &["pmid", "doi", "title", "journal", "year", "url"];

/// Agent bound to the biomedical literature service.
pub struct LiteratureAgent {
    client: Option<Arc<dyn RetrievalClient>>,
    chat: Arc<dyn ChatClient>,
    translation_prompt: String,
}

impl LiteratureAgent {
    /// Creates the agent. A `None` client makes every run report
    /// `failed/unavailable` instead of panicking.
    #[must_use]
    pub fn new(
        client: Option<Arc<dyn RetrievalClient>>,
        chat: Arc<dyn ChatClient>,
        translation_prompt: String,
    ) -> Self {
        Self {
            client,
            chat,
            translation_prompt,
        }
    }

    /// Translates `text` between languages, returning the original on any
    /// failure or deadline overrun.
    async fn translate(&self, text: &str, from: &str, to: &str, remaining: Duration) -> String {
        let request = ChatRequest {
            model: None,
            messages: vec![
                message::system_message(&self.translation_prompt),
                message::user_message(&build_translation_prompt(text, from, to)),
            ],
            temperature: Some(0.0),
            max_tokens: Some(TRANSLATION_MAX_TOKENS),
            json_mode: false,
        };

        match tokio::time::timeout(remaining, self.chat.chat(&request)).await {
            Ok(Ok(response)) if !response.content.trim().is_empty() => {
                response.content.trim().to_string()
            }
            Ok(Ok(_)) => text.to_string(),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "translation failed, keeping original text");
                text.to_string()
            }
            Err(_) => {
                tracing::warn!("translation timed out, keeping original text");
                text.to_string()
            }
        }
    }

    fn search_params(term: &str, filters: &ResearchFilters) -> serde_json::Value {
        let mut params = json!({
            "term": term,
            "max_results": filters.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        });
        if let Some(year_from) = filters.year_from
            && let Some(map) = params.as_object_mut()
        {
            map.insert("year_from".to_string(), json!(year_from));
        }
        params
    }
}

#[async_trait]
impl SpecialistAgent for LiteratureAgent {
    fn id(&self) -> AgentId {
        AgentId::Literature
    }

    async fn run(&self, query: &SubQuery, budget: Duration) -> AgentResult {
        let SubQuery::Research {
            term,
            filters,
            language,
        } = query
        else {
            return AgentResult::failed(FailureKind::Internal);
        };
        let Some(client) = &self.client else {
            return AgentResult::failed(FailureKind::Unavailable);
        };

        let deadline = Instant::now() + budget;
        let needs_translation = language != SOURCE_LANGUAGE;

        let search_term = if needs_translation {
            self.translate(
                term,
                language,
                SOURCE_LANGUAGE,
                deadline.saturating_duration_since(Instant::now()),
            )
            .await
        } else {
            term.clone()
        };

        let search = match call_with_retry(
            client.as_ref(),
            "search",
            Self::search_params(&search_term, filters),
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
                Document::from_record(record, Source::Literature, i + 1, CONTENT_KEYS, META_KEYS)
            })
            .collect();

        if needs_translation {
            for doc in &mut documents {
                doc.content = self
                    .translate(
                        &doc.content,
                        SOURCE_LANGUAGE,
                        language,
                        deadline.saturating_duration_since(Instant::now()),
                    )
                    .await;
            }
        }

        AgentResult::ok(documents)
    }
}
