//! General agent: a direct model answer with no retrieval.
//!
//! Exists so every dispatch plan yields at least one document to merge.
//! Its single document carries no citation metadata; when the plan holds
//! only this agent, the synthesizer short-circuits and the answer goes out
//! without citations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::document::{AgentResult, Document, FailureKind, Source};
use super::query::{AgentId, SubQuery};
use super::traits::SpecialistAgent;
use crate::chat::{ChatClient, ChatRequest, message};

/// Maximum tokens for the direct answer.
const GENERAL_MAX_TOKENS: u32 = 1024;

/// Agent that answers directly from the chat model.
pub struct GeneralAgent {
    chat: Arc<dyn ChatClient>,
    system_prompt: String,
    temperature: f32,
}

impl GeneralAgent {
    /// Creates the agent.
    #[must_use]
    pub fn new(chat: Arc<dyn ChatClient>, system_prompt: String, temperature: f32) -> Self {
        Self {
            chat,
            system_prompt,
            temperature,
        }
    }
}

#[async_trait]
impl SpecialistAgent for GeneralAgent {
    fn id(&self) -> AgentId {
        AgentId::General
    }

    async fn run(&self, query: &SubQuery, budget: Duration) -> AgentResult {
        let SubQuery::General { utterance } = query else {
            return AgentResult::failed(FailureKind::Internal);
        };

        let request = ChatRequest {
            model: None,
            messages: vec![
                message::system_message(&self.system_prompt),
                message::user_message(utterance),
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(GENERAL_MAX_TOKENS),
            json_mode: false,
        };

        let response = match tokio::time::timeout(budget, self.chat.chat(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "general answer failed");
                return AgentResult::failed(FailureKind::Upstream);
            }
            Err(_) => return AgentResult::failed(FailureKind::Timeout),
        };

        if response.content.trim().is_empty() {
            return AgentResult::empty();
        }

        AgentResult::ok(vec![Document {
            content: response.content,
            source: Source::General,
            source_meta: std::collections::BTreeMap::new(),
            provisional_index: 1,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::document::AgentStatus;
    use crate::chat::{ChatResponse, TokenUsage};
    use crate::error::ChatError;

    struct CannedChat {
        answer: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl ChatClient for CannedChat {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, ChatError> {
            if self.fail {
                return Err(ChatError::ApiRequest {
                    message: "down".to_string(),
                    status: Some(503),
                });
            }
            Ok(ChatResponse {
                content: self.answer.to_string(),
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn sub_query() -> SubQuery {
        SubQuery::General {
            utterance: "Co je to hypertenze?".to_string(),
        }
    }

    #[tokio::test]
    async fn test_produces_single_uncited_document() {
        let agent = GeneralAgent::new(
            Arc::new(CannedChat {
                answer: "Hypertenze je zvýšený krevní tlak.",
                fail: false,
            }),
            "system".to_string(),
            0.0,
        );
        let result = agent.run(&sub_query(), Duration::from_secs(5)).await;
        assert_eq!(result.status, AgentStatus::Ok);
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0].provisional_index, 1);
        assert!(result.documents[0].source_meta.is_empty());
        assert_eq!(result.documents[0].source, Source::General);
    }

    #[tokio::test]
    async fn test_chat_failure_is_upstream() {
        let agent = GeneralAgent::new(
            Arc::new(CannedChat {
                answer: "",
                fail: true,
            }),
            "system".to_string(),
            0.0,
        );
        let result = agent.run(&sub_query(), Duration::from_secs(5)).await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert_eq!(result.error_kind, Some(FailureKind::Upstream));
    }

    #[tokio::test]
    async fn test_blank_answer_is_empty() {
        let agent = GeneralAgent::new(
            Arc::new(CannedChat {
                answer: "   ",
                fail: false,
            }),
            "system".to_string(),
            0.0,
        );
        let result = agent.run(&sub_query(), Duration::from_secs(5)).await;
        assert_eq!(result.status, AgentStatus::Empty);
    }
}
