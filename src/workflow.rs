//! Per-request workflow: classify → dispatch → synthesize.
//!
//! The runtime context is a plain struct of interface handles plus
//! configuration, passed explicitly into each component. Workflow state
//! lives for one request, has one writer per phase, and dies when the
//! terminal event flushes. One deadline covers the whole pipeline and
//! overrides per-call deadlines when shorter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{
    DrugAgent, GeneralAgent, GuidelineAgent, LiteratureAgent,
};
use crate::chat::{ChatClient, create_chat_client};
use crate::classify::{Classifier, UpstreamHealth};
use crate::config::GatewayConfig;
use crate::dispatch::{AgentSet, Dispatcher, all_failed};
use crate::error::GatewayError;
use crate::events::{FinalPayload, LifecycleEvent, RetrievedDoc};
use crate::prompt::PromptSet;
use crate::retrieval::{
    DrugRegistryClient, GuidelineStore, Health, LiteratureClient, RetrievalClient,
};
use crate::synthesize::Synthesizer;

/// Budget for one upstream health probe during classification.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Long-lived handles shared by every request.
pub struct RuntimeContext {
    /// Chat provider used for classification, synthesis, and translation.
    pub chat: Arc<dyn ChatClient>,
    /// Drug registry client, when configured.
    pub drug: Option<Arc<dyn RetrievalClient>>,
    /// Literature client, when configured.
    pub literature: Option<Arc<dyn RetrievalClient>>,
    /// Guideline store, when configured.
    pub guideline: Option<Arc<dyn RetrievalClient>>,
    /// Resolved gateway configuration.
    pub config: GatewayConfig,
    /// Resolved system prompts.
    pub prompts: PromptSet,
}

impl RuntimeContext {
    /// Builds the context from configuration: chat client plus whichever
    /// retrieval clients have endpoints configured. Missing endpoints leave
    /// the handle unset; the owning agent reports `unavailable` instead.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured client cannot be constructed.
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        let chat: Arc<dyn ChatClient> = Arc::from(create_chat_client(&config)?);

        let drug = config
            .drug_endpoint
            .as_ref()
            .map(|endpoint| DrugRegistryClient::new(endpoint, config.retrieval_deadline))
            .transpose()?
            .map(|client| Arc::new(client) as Arc<dyn RetrievalClient>);

        let literature = config
            .literature_endpoint
            .as_ref()
            .map(|endpoint| LiteratureClient::new(endpoint, config.retrieval_deadline))
            .transpose()?
            .map(|client| Arc::new(client) as Arc<dyn RetrievalClient>);

        let guideline = config
            .guideline_db
            .as_ref()
            .map(|path| GuidelineStore::open(path, config.retrieval_deadline))
            .transpose()?
            .map(|client| Arc::new(client) as Arc<dyn RetrievalClient>);

        let prompts = PromptSet::load(config.prompt_dir.as_deref());

        Ok(Self {
            chat,
            drug,
            literature,
            guideline,
            config,
            prompts,
        })
    }

    /// Probes all upstream healths concurrently under a short budget.
    ///
    /// Unconfigured clients are unavailable by definition; a probe that
    /// overruns its budget counts as unavailable as well.
    pub async fn snapshot_health(&self) -> UpstreamHealth {
        async fn probe(client: Option<&Arc<dyn RetrievalClient>>) -> Health {
            match client {
                None => Health::Unavailable,
                Some(client) => tokio::time::timeout(HEALTH_PROBE_TIMEOUT, client.health_check())
                    .await
                    .unwrap_or(Health::Unavailable),
            }
        }

        let (drug, literature, guideline) = tokio::join!(
            probe(self.drug.as_ref()),
            probe(self.literature.as_ref()),
            probe(self.guideline.as_ref()),
        );

        UpstreamHealth {
            drug,
            literature,
            guideline,
        }
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("chat", &self.chat.name())
            .field("drug", &self.drug.is_some())
            .field("literature", &self.literature.is_some())
            .field("guideline", &self.guideline.is_some())
            .finish()
    }
}

/// The classify → dispatch → synthesize pipeline for one request.
pub struct Workflow {
    classifier: Classifier,
    dispatcher: Dispatcher,
    synthesizer: Synthesizer,
    deadline: Duration,
}

impl Workflow {
    /// Wires the pipeline components from the runtime context.
    #[must_use]
    pub fn new(ctx: &RuntimeContext) -> Self {
        let config = &ctx.config;
        let prompts = &ctx.prompts;

        let classifier = Classifier::new(
            Arc::clone(&ctx.chat),
            prompts.classifier.clone(),
            config.keywords.clone(),
            config.user_language.clone(),
            config.classify_max_tokens,
        );

        let agents = AgentSet {
            drug: Arc::new(DrugAgent::new(ctx.drug.clone())),
            literature: Arc::new(LiteratureAgent::new(
                ctx.literature.clone(),
                Arc::clone(&ctx.chat),
                prompts.translation.clone(),
            )),
            guideline: Arc::new(GuidelineAgent::new(ctx.guideline.clone())),
            general: Arc::new(GeneralAgent::new(
                Arc::clone(&ctx.chat),
                prompts.general.clone(),
                config.temperature,
            )),
        };

        let synthesizer = Synthesizer::new(
            Arc::clone(&ctx.chat),
            prompts.synthesizer.clone(),
            config.temperature,
            config.synthesis_max_tokens,
            config.user_language.clone(),
            config.terminology.clone(),
        );

        Self {
            classifier,
            dispatcher: Dispatcher::new(agents),
            synthesizer,
            deadline: config.workflow_deadline,
        }
    }

    /// Runs the pipeline for one validated query.
    ///
    /// Intermediate lifecycle events flow into `events`; the final payload
    /// comes back to the caller, which owns terminal event emission. On
    /// deadline expiry all in-flight work is cancelled and no partial
    /// payload is produced.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] on deadline expiry, or the
    /// synthesis error when generation fails unrecoverably.
    pub async fn run(
        &self,
        ctx: &RuntimeContext,
        request_id: Uuid,
        query: &str,
        events: &mpsc::Sender<LifecycleEvent>,
        cancel: &CancellationToken,
    ) -> Result<FinalPayload, GatewayError> {
        let started = Instant::now();
        let deadline = self.deadline;

        let pipeline = async {
            let health = ctx.snapshot_health().await;

            let plan = self
                .classifier
                .classify(query, &health, remaining(started, deadline))
                .await;
            tracing::info!(
                %request_id,
                agents = plan.entries.len(),
                decided_by = ?plan.decided_by,
                "plan ready"
            );

            let results = self
                .dispatcher
                .run(&plan, remaining(started, deadline), events, cancel)
                .await;

            if all_failed(&results) {
                tracing::warn!(%request_id, "every agent in the plan failed");
            }

            let output = self
                .synthesizer
                .synthesize(query, &plan, &results, events, remaining(started, deadline))
                .await?;

            let retrieved_docs = output
                .merged_documents
                .iter()
                .map(RetrievedDoc::from_document)
                .collect();

            Ok(FinalPayload {
                answer: output.answer,
                retrieved_docs,
                confidence: None,
                latency_ms: started.elapsed().as_millis() as u64,
            })
        };

        let outcome = tokio::select! {
            // Client disconnect: stop immediately, nobody reads the answer.
            () = cancel.cancelled() => Err(GatewayError::Internal {
                message: "request cancelled".to_string(),
            }),
            result = tokio::time::timeout(deadline, pipeline) => {
                result.map_err(|_| GatewayError::Timeout).and_then(|r| r)
            }
        };

        // Make sure nothing keeps running past the workflow's end.
        cancel.cancel();
        outcome
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("deadline", &self.deadline)
            .finish()
    }
}

fn remaining(started: Instant, deadline: Duration) -> Duration {
    deadline.saturating_sub(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatRequest, ChatResponse, TokenUsage};
    use crate::error::ChatError;
    use crate::retrieval::ToolResult;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    /// Chat fake: structured reply for JSON-mode calls, prose otherwise.
    struct FakeChat {
        classification: String,
        prose: String,
    }

    #[async_trait]
    impl crate::chat::ChatClient for FakeChat {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
            let content = if request.json_mode {
                self.classification.clone()
            } else {
                self.prose.clone()
            };
            Ok(ChatResponse {
                content,
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    struct CannedRegistry {
        records: Vec<Value>,
    }

    #[async_trait]
    impl RetrievalClient for CannedRegistry {
        fn name(&self) -> &'static str {
            "drug"
        }

        async fn call_tool(&self, _tool: &str, _params: Value) -> ToolResult {
            ToolResult::from_records(self.records.clone())
        }

        async fn health_check(&self) -> Health {
            Health::Available
        }
    }

    fn context(classification: &str, prose: &str, drug_records: Vec<Value>) -> RuntimeContext {
        let config = GatewayConfig::builder()
            .api_key("test")
            .workflow_deadline(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| unreachable!());
        RuntimeContext {
            chat: Arc::new(FakeChat {
                classification: classification.to_string(),
                prose: prose.to_string(),
            }),
            drug: Some(Arc::new(CannedRegistry {
                records: drug_records,
            })),
            literature: None,
            guideline: None,
            config,
            prompts: PromptSet::defaults(),
        }
    }

    #[tokio::test]
    async fn test_drug_question_end_to_end() {
        let ctx = context(
            r#"{"agents": [{"id": "drug", "term": "metformin"}]}"#,
            "Metformin je kontraindikován při renálním selhání [1].",
            vec![json!({"registration_number": "0012345", "summary": "Kontraindikace"})],
        );
        let workflow = Workflow::new(&ctx);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let payload = workflow
            .run(&ctx, Uuid::new_v4(), "kontraindikace metforminu", &tx, &cancel)
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(payload.answer.contains("[1]"));
        assert_eq!(payload.retrieved_docs.len(), 1);
        assert_eq!(
            payload.retrieved_docs[0].metadata.get("source").map(String::as_str),
            Some("drug")
        );
        assert_eq!(
            payload
                .retrieved_docs[0]
                .metadata
                .get("registration_number")
                .map(String::as_str),
            Some("0012345")
        );
        assert!(payload.confidence.is_none());

        drop(tx);
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec!["agent_start", "agent_complete", "agent_start", "agent_complete"]
        );
    }

    #[tokio::test]
    async fn test_unavailable_upstream_falls_back_to_general() {
        // Classifier targets the drug agent, but no drug client is
        // configured, so its health is unavailable and the keyword route
        // takes over; a keyword-free utterance lands on the general agent.
        let mut ctx = context(
            r#"{"agents": [{"id": "drug", "term": "x"}]}"#,
            "Obecná odpověď.",
            vec![],
        );
        ctx.drug = None;
        let workflow = Workflow::new(&ctx);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let payload = workflow
            .run(&ctx, Uuid::new_v4(), "co s bolestí hlavy", &tx, &cancel)
            .await
            .unwrap_or_else(|_| unreachable!());

        // General short-circuit: direct answer, no citations, no documents.
        assert_eq!(payload.answer, "Obecná odpověď.");
        assert!(payload.retrieved_docs.is_empty());
    }

    #[tokio::test]
    async fn test_workflow_cancels_token_on_completion() {
        let ctx = context(
            r#"{"agents": [{"id": "general"}]}"#,
            "odpověď",
            vec![],
        );
        let workflow = Workflow::new(&ctx);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let _ = workflow
            .run(&ctx, Uuid::new_v4(), "otázka", &tx, &cancel)
            .await;
        assert!(cancel.is_cancelled());
    }
}
