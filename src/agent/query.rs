//! Typed sub-queries and the dispatch plan.
//!
//! The classifier projects one user utterance into per-agent sub-queries
//! and orders them in a [`DispatchPlan`]. Plans are never empty: when
//! classification fails entirely, the plan is a single general-agent entry
//! carrying the raw utterance.

use serde::{Deserialize, Serialize};

/// Identifier of a specialist agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    /// Pharmaceutical registry agent.
    Drug,
    /// Biomedical literature agent.
    Literature,
    /// Guideline corpus agent.
    Guideline,
    /// Direct-answer fallback agent.
    General,
}

impl AgentId {
    /// Returns the wire representation of the agent id.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drug => "drug",
            Self::Literature => "literature",
            Self::Guideline => "guideline",
            Self::General => "general",
        }
    }

    /// Parses an agent id (case-insensitive). Unknown names return `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "drug" => Some(Self::Drug),
            "literature" => Some(Self::Literature),
            "guideline" => Some(Self::Guideline),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the drug agent should fetch beyond the basic search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrugIntent {
    /// Basic product information.
    #[default]
    Info,
    /// Full registration details.
    Details,
    /// Reimbursement and pricing data.
    Reimbursement,
}

/// Filters for a literature search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFilters {
    /// Only publications from this year onward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_from: Option<u32>,
    /// Cap on returned publications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

/// A typed projection of the user utterance for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubQuery {
    /// Query for the drug agent.
    Drug {
        /// Search term (drug name or free text).
        term: String,
        /// What to fetch beyond the basic search.
        #[serde(default)]
        intent: DrugIntent,
    },
    /// Query for the literature agent.
    Research {
        /// Search term.
        term: String,
        /// Search filters.
        #[serde(default)]
        filters: ResearchFilters,
        /// Language of the consulting user (ISO 639-1). The agent
        /// translates to and from the source language when they differ.
        language: String,
    },
    /// Query for the guideline agent.
    Guideline {
        /// Search term.
        term: String,
    },
    /// Raw utterance for the general agent.
    General {
        /// The user's question, unmodified.
        utterance: String,
    },
}

impl SubQuery {
    /// Returns the agent this sub-query targets.
    #[must_use]
    pub const fn agent(&self) -> AgentId {
        match self {
            Self::Drug { .. } => AgentId::Drug,
            Self::Research { .. } => AgentId::Literature,
            Self::Guideline { .. } => AgentId::Guideline,
            Self::General { .. } => AgentId::General,
        }
    }
}

/// How the dispatch plan was decided.
///
/// Recorded on every plan so tests and operators can observe which routing
/// tier produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteDecision {
    /// The model classification tier produced the plan.
    Model,
    /// The deterministic keyword route produced the plan.
    Keyword,
}

/// One entry of a dispatch plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Agent to invoke.
    pub agent: AgentId,
    /// Sub-query for that agent.
    pub query: SubQuery,
}

/// The ordered, non-empty set of agents to invoke for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPlan {
    /// Plan entries, in invocation (and later merge) order.
    pub entries: Vec<PlanEntry>,
    /// Which routing tier decided this plan.
    pub decided_by: RouteDecision,
}

impl DispatchPlan {
    /// Builds a plan from entries; an empty entry list falls back to the
    /// general agent so the non-empty invariant holds by construction.
    #[must_use]
    pub fn new(entries: Vec<PlanEntry>, decided_by: RouteDecision, utterance: &str) -> Self {
        if entries.is_empty() {
            return Self::general_fallback(utterance);
        }
        Self {
            entries,
            decided_by,
        }
    }

    /// The single-entry general-agent plan used when classification fails.
    #[must_use]
    pub fn general_fallback(utterance: &str) -> Self {
        Self {
            entries: vec![PlanEntry {
                agent: AgentId::General,
                query: SubQuery::General {
                    utterance: utterance.to_string(),
                },
            }],
            decided_by: RouteDecision::Keyword,
        }
    }

    /// Returns `true` if the plan is exactly the single general-agent entry.
    #[must_use]
    pub fn is_general_only(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].agent == AgentId::General
    }
}
