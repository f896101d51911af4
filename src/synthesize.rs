//! Merging agent outputs into one cited answer.
//!
//! Walks agent results in dispatch-plan order, renumbers documents into a
//! single dense global citation space, prompts the model for prose that
//! cites those numbers, then validates and repairs the citations it
//! actually produced. A deterministic terminology pass runs last and never
//! touches citation tokens.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;

use crate::agent::document::{AgentResult, AgentStatus, Document};
use crate::agent::query::{AgentId, DispatchPlan};
use crate::chat::{ChatClient, ChatRequest, message};
use crate::error::{ChatError, GatewayError};
use crate::events::LifecycleEvent;
use crate::prompt::{DocContext, build_synthesis_prompt};

/// Inline citation token: `[K]` with K a positive integer.
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap_or_else(|_| unreachable!()));

/// Answer used when every agent in the plan failed.
const ALL_SOURCES_DOWN_ANSWER: &str = "Omlouváme se, odborné zdroje jsou momentálně nedostupné, \
     takže na dotaz nyní nedokážeme odpovědět s citacemi. Zkuste to prosím za chvíli znovu.";

/// Event name the synthesizer reports under.
const SYNTHESIZER_NAME: &str = "synthesizer";

/// Result of the synthesis pass.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Final prose answer.
    pub answer: String,
    /// Documents in global citation order; position K-1 backs `[K]`.
    pub merged_documents: Vec<Document>,
}

/// Synthesizer over the chat model.
pub struct Synthesizer {
    chat: Arc<dyn ChatClient>,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    user_language: String,
    terminology: Vec<(String, String)>,
}

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatClient>,
        system_prompt: String,
        temperature: f32,
        max_tokens: u32,
        user_language: impl Into<String>,
        terminology: Vec<(String, String)>,
    ) -> Self {
        Self {
            chat,
            system_prompt,
            temperature,
            max_tokens,
            user_language: user_language.into(),
            terminology,
        }
    }

    /// Produces the final answer and the globally renumbered document list.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] when the generation call overruns
    /// the remaining budget, or a chat error for unrecoverable provider
    /// faults. Total upstream failure is not an error: it produces the
    /// graceful-degradation answer with zero documents.
    pub async fn synthesize(
        &self,
        question: &str,
        plan: &DispatchPlan,
        results: &[(AgentId, AgentResult)],
        events: &mpsc::Sender<LifecycleEvent>,
        budget: Duration,
    ) -> Result<SynthesisOutput, GatewayError> {
        let _ = events
            .send(LifecycleEvent::AgentStart {
                agent: SYNTHESIZER_NAME.to_string(),
            })
            .await;

        let output = self.synthesize_inner(question, plan, results, budget).await;

        let _ = events
            .send(LifecycleEvent::AgentComplete {
                agent: SYNTHESIZER_NAME.to_string(),
            })
            .await;

        output
    }

    async fn synthesize_inner(
        &self,
        question: &str,
        plan: &DispatchPlan,
        results: &[(AgentId, AgentResult)],
        budget: Duration,
    ) -> Result<SynthesisOutput, GatewayError> {
        // Single-agent short-circuit: a general-only plan answers directly,
        // with no citations and no merged documents.
        if plan.is_general_only()
            && let Some((_, result)) = results.first()
            && let Some(doc) = result.documents.first()
        {
            return Ok(SynthesisOutput {
                answer: doc.content.clone(),
                merged_documents: Vec::new(),
            });
        }

        if results
            .iter()
            .all(|(_, r)| r.status == AgentStatus::Failed)
        {
            return Ok(SynthesisOutput {
                answer: ALL_SOURCES_DOWN_ANSWER.to_string(),
                merged_documents: Vec::new(),
            });
        }

        let merged = merge_documents(results);
        let contexts: Vec<DocContext<'_>> = merged
            .iter()
            .enumerate()
            .map(|(i, (agent, doc))| DocContext {
                global_index: i + 1,
                agent: *agent,
                provisional_index: doc.provisional_index,
                source: doc.source.as_str(),
                content: &doc.content,
            })
            .collect();

        let request = ChatRequest {
            model: None,
            messages: vec![
                message::system_message(&self.system_prompt),
                message::user_message(&build_synthesis_prompt(
                    question,
                    &self.user_language,
                    &contexts,
                )),
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            json_mode: false,
        };

        let response = match tokio::time::timeout(budget, self.chat.chat(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(ChatError::Timeout)) | Err(_) => return Err(GatewayError::Timeout),
            Ok(Err(err)) => return Err(GatewayError::Chat(err)),
        };

        let merged_documents: Vec<Document> =
            merged.into_iter().map(|(_, doc)| doc).collect();
        let answer = repair_citations(response.content.trim(), merged_documents.len());
        let answer = apply_terminology(&answer, &self.terminology);

        Ok(SynthesisOutput {
            answer,
            merged_documents,
        })
    }
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("chat", &self.chat.name())
            .field("user_language", &self.user_language)
            .finish()
    }
}

/// Merges agent outputs into global citation order.
///
/// Agents walk in dispatch-plan order and documents within each agent in
/// provisional-index order, so the global numbering is deterministic for a
/// given plan regardless of completion timing. Provisional indices are
/// dead after this point; only list position matters.
fn merge_documents(results: &[(AgentId, AgentResult)]) -> Vec<(AgentId, Document)> {
    let mut merged = Vec::new();
    for (agent, result) in results {
        let mut documents = result.documents.clone();
        documents.sort_by_key(|d| d.provisional_index);
        for doc in documents {
            merged.push((*agent, doc));
        }
    }
    merged
}

/// Validates `[K]` tokens against the document count and repairs the text.
///
/// Out-of-range tokens are dropped with the surrounding prose intact. If
/// the repair leaves no valid citation while documents exist, a
/// deterministic `[1]` tail lands at the end of the final sentence.
fn repair_citations(answer: &str, document_count: usize) -> String {
    let mut any_valid = false;
    let repaired = CITATION_RE.replace_all(answer, |caps: &regex::Captures<'_>| {
        let in_range = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .is_some_and(|k| k >= 1 && k <= document_count);
        if in_range {
            any_valid = true;
            caps[0].to_string()
        } else {
            String::new()
        }
    });

    let repaired = repaired.trim_end().to_string();
    if document_count >= 1 && !any_valid {
        return format!("{repaired} [1]");
    }
    repaired
}

/// Applies the preferred-term table outside citation tokens.
///
/// The text splits on citation tokens so substitutions can never rewrite a
/// `[K]` reference, whatever the table contains.
fn apply_terminology(answer: &str, table: &[(String, String)]) -> String {
    if table.is_empty() {
        return answer.to_string();
    }

    let mut out = String::with_capacity(answer.len());
    let mut last = 0;
    for token in CITATION_RE.find_iter(answer) {
        out.push_str(&substitute(&answer[last..token.start()], table));
        out.push_str(token.as_str());
        last = token.end();
    }
    out.push_str(&substitute(&answer[last..], table));
    out
}

fn substitute(segment: &str, table: &[(String, String)]) -> String {
    let mut text = segment.to_string();
    for (find, replace) in table {
        if !find.is_empty() {
            text = text.replace(find.as_str(), replace.as_str());
        }
    }
    text
}
