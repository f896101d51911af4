//! Two-tier request classification.
//!
//! Tier 1 asks the chat model for a structured routing object (JSON mode,
//! temperature 0). Tier 2 is [`Classifier::keyword_route`], a deterministic
//! pure function and the single source of truth for keyword routing: tier 1
//! rejection falls back to it rather than reimplementing the rules.
//!
//! Matching is case-insensitive, whole-token, and diacritic-insensitive;
//! substring scans are deliberately avoided because they match inside
//! unrelated words. The classifier never returns an empty plan.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::agent::query::{
    AgentId, DispatchPlan, DrugIntent, PlanEntry, ResearchFilters, RouteDecision, SubQuery,
};
use crate::chat::{ChatClient, ChatRequest, message};
use crate::config::KeywordSets;
use crate::prompt::build_classification_prompt;
use crate::retrieval::Health;

/// Health snapshot of the three retrieval upstreams, taken at call time.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamHealth {
    /// Pharmaceutical registry health.
    pub drug: Health,
    /// Literature service health.
    pub literature: Health,
    /// Guideline corpus health.
    pub guideline: Health,
}

impl UpstreamHealth {
    /// Snapshot with every upstream available.
    #[must_use]
    pub const fn all_available() -> Self {
        Self {
            drug: Health::Available,
            literature: Health::Available,
            guideline: Health::Available,
        }
    }

    /// Health of the upstream backing `agent`. The general agent has no
    /// upstream and is always available.
    #[must_use]
    pub const fn of(&self, agent: AgentId) -> Health {
        match agent {
            AgentId::Drug => self.drug,
            AgentId::Literature => self.literature,
            AgentId::Guideline => self.guideline,
            AgentId::General => Health::Available,
        }
    }
}

/// Model-tier classification response shape.
#[derive(Debug, Deserialize)]
struct ModelClassification {
    #[serde(default)]
    #[allow(dead_code)]
    intent: String,
    #[serde(default)]
    agents: Vec<ModelAgent>,
}

/// One routed agent in the model response.
#[derive(Debug, Deserialize)]
struct ModelAgent {
    id: String,
    #[serde(default)]
    term: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    year_from: Option<u32>,
}

/// Classifier mapping one utterance to a dispatch plan.
pub struct Classifier {
    chat: Arc<dyn ChatClient>,
    system_prompt: String,
    keywords: KeywordSets,
    user_language: String,
    max_tokens: u32,
}

impl Classifier {
    /// Creates a classifier.
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatClient>,
        system_prompt: String,
        keywords: KeywordSets,
        user_language: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            chat,
            system_prompt,
            keywords,
            user_language: user_language.into(),
            max_tokens,
        }
    }

    /// Classifies an utterance into a dispatch plan.
    ///
    /// Attempts the model tier first; any rejection — unparseable response,
    /// unknown agent id, or an agent whose upstream reports unavailable in
    /// the `health` snapshot — falls back to [`Self::keyword_route`]. Never
    /// returns an empty plan.
    pub async fn classify(
        &self,
        utterance: &str,
        health: &UpstreamHealth,
        budget: Duration,
    ) -> DispatchPlan {
        let request = ChatRequest {
            model: None,
            messages: vec![
                message::system_message(&self.system_prompt),
                message::user_message(&build_classification_prompt(utterance)),
            ],
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            json_mode: true,
        };

        let response = match tokio::time::timeout(budget, self.chat.chat(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "classification call failed, using keyword route");
                return self.keyword_route(utterance);
            }
            Err(_) => {
                tracing::warn!("classification timed out, using keyword route");
                return self.keyword_route(utterance);
            }
        };

        match self.parse_entries(&response.content, utterance) {
            Some(entries) => {
                if let Some(entry) = entries
                    .iter()
                    .find(|e| health.of(e.agent) == Health::Unavailable)
                {
                    tracing::warn!(
                        agent = %entry.agent,
                        "model plan targets unavailable upstream, using keyword route"
                    );
                    return self.keyword_route(utterance);
                }
                tracing::debug!(agents = entries.len(), "model classification accepted");
                DispatchPlan::new(entries, RouteDecision::Model, utterance)
            }
            None => {
                tracing::debug!("model classification rejected, using keyword route");
                self.keyword_route(utterance)
            }
        }
    }

    /// Parses the model response into plan entries.
    ///
    /// Returns `None` when the response is not parseable, names an unknown
    /// agent, or routes nowhere — all of which reject the model tier.
    fn parse_entries(&self, content: &str, utterance: &str) -> Option<Vec<PlanEntry>> {
        let trimmed = content.trim();

        // Handle markdown code blocks
        let json_str = if trimmed.starts_with("```") {
            trimmed
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim()
        } else {
            trimmed
        };

        let parsed: ModelClassification = serde_json::from_str(json_str).ok()?;
        if parsed.agents.is_empty() {
            return None;
        }

        let mut entries = Vec::with_capacity(parsed.agents.len());
        for agent in parsed.agents {
            let id = AgentId::parse(&agent.id)?;
            let term = agent
                .term
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| utterance.to_string());
            let query = match id {
                AgentId::Drug => SubQuery::Drug {
                    term,
                    intent: agent
                        .intent
                        .as_deref()
                        .map_or(DrugIntent::Info, parse_drug_intent),
                },
                AgentId::Literature => SubQuery::Research {
                    term,
                    filters: ResearchFilters {
                        year_from: agent.year_from,
                        max_results: None,
                    },
                    language: self.user_language.clone(),
                },
                AgentId::Guideline => SubQuery::Guideline { term },
                AgentId::General => SubQuery::General {
                    utterance: utterance.to_string(),
                },
            };
            entries.push(PlanEntry { agent: id, query });
        }
        Some(entries)
    }

    /// Deterministic keyword routing for this classifier's keyword sets.
    ///
    /// Delegates to [`keyword_route`], the single source of truth.
    #[must_use]
    pub fn keyword_route(&self, utterance: &str) -> DispatchPlan {
        keyword_route(utterance, &self.keywords, &self.user_language)
    }
}

/// Deterministic keyword routing — the canonical fallback.
///
/// Priority order is part of the contract: drug beats research beats
/// guideline beats the general fallback. Ties between categories are
/// impossible because the first matching category wins.
#[must_use]
pub fn keyword_route(
    utterance: &str,
    keywords: &KeywordSets,
    user_language: &str,
) -> DispatchPlan {
    let tokens: Vec<String> = utterance
        .unicode_words()
        .map(|w| fold_diacritics(&w.to_lowercase()))
        .collect();

    let matches = |set: &[String]| {
        set.iter()
            .any(|k| tokens.iter().any(|t| t == &fold_diacritics(&k.to_lowercase())))
    };

    let entry = if matches(&keywords.drug) {
        PlanEntry {
            agent: AgentId::Drug,
            query: SubQuery::Drug {
                term: utterance.to_string(),
                intent: DrugIntent::Info,
            },
        }
    } else if matches(&keywords.research) {
        PlanEntry {
            agent: AgentId::Literature,
            query: SubQuery::Research {
                term: utterance.to_string(),
                filters: ResearchFilters::default(),
                language: user_language.to_string(),
            },
        }
    } else if matches(&keywords.guideline) {
        PlanEntry {
            agent: AgentId::Guideline,
            query: SubQuery::Guideline {
                term: utterance.to_string(),
            },
        }
    } else {
        return DispatchPlan::general_fallback(utterance);
    };

    DispatchPlan {
        entries: vec![entry],
        decided_by: RouteDecision::Keyword,
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("chat", &self.chat.name())
            .field("user_language", &self.user_language)
            .finish()
    }
}

fn parse_drug_intent(s: &str) -> DrugIntent {
    match s.to_lowercase().as_str() {
        "details" => DrugIntent::Details,
        "reimbursement" => DrugIntent::Reimbursement,
        _ => DrugIntent::Info,
    }
}

/// Folds Czech and Slovak diacritics to their ASCII base letters.
///
/// Keyword matching must treat "dávkování" and "davkovani" as the same
/// token; full Unicode normalization is overkill for the closed keyword
/// alphabet, a folding table covers it.
fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'č' => 'c',
            'ď' => 'd',
            'é' | 'ě' => 'e',
            'í' => 'i',
            'ľ' | 'ĺ' => 'l',
            'ň' => 'n',
            'ó' | 'ô' => 'o',
            'ř' | 'ŕ' => 'r',
            'š' => 's',
            'ť' => 't',
            'ú' | 'ů' => 'u',
            'ý' => 'y',
            'ž' => 'z',
            'ä' => 'a',
            other => other,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::chat::{ChatResponse, TokenUsage};
    use crate::error::ChatError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use test_case::test_case;

    struct CannedChat {
        response: String,
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
                    status: Some(500),
                });
            }
            Ok(ChatResponse {
                content: self.response.clone(),
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
            })
        }
    }

    fn classifier(response: &str, fail: bool) -> Classifier {
        Classifier::new(
            Arc::new(CannedChat {
                response: response.to_string(),
                fail,
            }),
            "classify".to_string(),
            KeywordSets::default(),
            "cs",
            512,
        )
    }

    #[test]
    fn test_fold_diacritics() {
        assert_eq!(fold_diacritics("dávkování"), "davkovani");
        assert_eq!(fold_diacritics("příbalový"), "pribalovy");
        assert_eq!(fold_diacritics("plain"), "plain");
    }

    #[test_case("Jaké jsou kontraindikace metforminu?", AgentId::Drug; "drug keyword")]
    #[test_case("nejnovější studie o SGLT2", AgentId::Literature; "research keyword")]
    #[test_case("ESC doporučené postupy pro hypertenzi", AgentId::Guideline; "guideline keyword")]
    #[test_case("Co mám dělat s bolestí hlavy?", AgentId::General; "no keyword")]
    fn test_keyword_route_targets(utterance: &str, expected: AgentId) {
        let plan = classifier("{}", false).keyword_route(utterance);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].agent, expected);
        assert_eq!(plan.decided_by, RouteDecision::Keyword);
    }

    #[test]
    fn test_keyword_priority_drug_beats_research() {
        // Contains both a research keyword ("studie") and a drug keyword
        // ("davkovani" spelled with diacritics).
        let plan = classifier("{}", false).keyword_route("studie o dávkování metforminu");
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].agent, AgentId::Drug);
    }

    #[test]
    fn test_keyword_priority_research_beats_guideline() {
        let plan = classifier("{}", false).keyword_route("studie k doporučeným postupům");
        assert_eq!(plan.entries[0].agent, AgentId::Literature);
    }

    #[test]
    fn test_keyword_matching_is_whole_token() {
        // "lek" appears only inside another word; substring matching would
        // route this to the drug agent.
        let plan = classifier("{}", false).keyword_route("výsledky elektrokardiogramu");
        assert_eq!(plan.entries[0].agent, AgentId::General);
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let plan = classifier("{}", false).keyword_route("KONTRAINDIKACE WARFARINU");
        assert_eq!(plan.entries[0].agent, AgentId::Drug);
    }

    #[tokio::test]
    async fn test_model_plan_accepted() {
        let response = r#"{"intent": "combined", "agents": [
            {"id": "drug", "term": "metformin", "intent": "info"},
            {"id": "literature", "term": "metformin outcomes", "year_from": 2020}
        ]}"#;
        let plan = classifier(response, false)
            .classify("otázka", &UpstreamHealth::all_available(), Duration::from_secs(5))
            .await;
        assert_eq!(plan.decided_by, RouteDecision::Model);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].agent, AgentId::Drug);
        match &plan.entries[1].query {
            SubQuery::Research { filters, language, .. } => {
                assert_eq!(filters.year_from, Some(2020));
                assert_eq!(language, "cs");
            }
            other => panic!("expected research sub-query, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_model_plan_in_code_fence_accepted() {
        let response = "```json\n{\"agents\": [{\"id\": \"guideline\", \"term\": \"hypertenze\"}]}\n```";
        let plan = classifier(response, false)
            .classify("otázka", &UpstreamHealth::all_available(), Duration::from_secs(5))
            .await;
        assert_eq!(plan.decided_by, RouteDecision::Model);
        assert_eq!(plan.entries[0].agent, AgentId::Guideline);
    }

    #[tokio::test]
    async fn test_unknown_agent_falls_back_to_keyword_route() {
        let response = r#"{"agents": [{"id": "pharmacist", "term": "metformin"}]}"#;
        let plan = classifier(response, false)
            .classify(
                "studie o metforminu",
                &UpstreamHealth::all_available(),
                Duration::from_secs(5),
            )
            .await;
        // The decision log shows the canonical keyword route ran.
        assert_eq!(plan.decided_by, RouteDecision::Keyword);
        assert_eq!(plan.entries[0].agent, AgentId::Drug);
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back() {
        let plan = classifier("sorry, I cannot help", false)
            .classify("otázka", &UpstreamHealth::all_available(), Duration::from_secs(5))
            .await;
        assert_eq!(plan.decided_by, RouteDecision::Keyword);
        assert_eq!(plan.entries[0].agent, AgentId::General);
    }

    #[tokio::test]
    async fn test_unavailable_upstream_falls_back() {
        let response = r#"{"agents": [{"id": "drug", "term": "metformin"}]}"#;
        let health = UpstreamHealth {
            drug: Health::Unavailable,
            literature: Health::Available,
            guideline: Health::Available,
        };
        let plan = classifier(response, false)
            .classify("něco obecného", &health, Duration::from_secs(5))
            .await;
        assert_eq!(plan.decided_by, RouteDecision::Keyword);
    }

    #[tokio::test]
    async fn test_chat_failure_falls_back() {
        let plan = classifier("", true)
            .classify("otázka", &UpstreamHealth::all_available(), Duration::from_secs(5))
            .await;
        assert_eq!(plan.decided_by, RouteDecision::Keyword);
        assert!(!plan.entries.is_empty());
    }

    proptest! {
        /// Classifier totality: every utterance yields a non-empty plan.
        #[test]
        fn prop_keyword_route_total(utterance in ".{0,200}") {
            let plan = classifier("{}", false).keyword_route(&utterance);
            prop_assert!(!plan.entries.is_empty());
        }
    }
}
