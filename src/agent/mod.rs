//! Specialist retrieval agents.
//!
//! Each agent is bound to one upstream source and converts a typed
//! sub-query into documents with provisional citation indices. The
//! dispatcher fans out over the agents a plan names; the synthesizer
//! merges their outputs.
//!
//! # Architecture
//!
//! ```text
//! User question → Classifier → DispatchPlan
//!   ├── Fan-out → {DrugAgent, LiteratureAgent, GuidelineAgent, GeneralAgent}
//!   │   └── Each yields AgentResult{documents, status}
//!   ├── Merge + renumber citations (plan order)
//!   └── Synthesis → final answer with [K] references
//! ```

pub mod document;
pub mod drug;
pub mod general;
pub mod guideline;
pub mod literature;
pub mod query;
pub mod traits;

// Re-export key types
pub use document::{AgentResult, AgentStatus, Document, FailureKind, Source};
pub use drug::DrugAgent;
pub use general::GeneralAgent;
pub use guideline::GuidelineAgent;
pub use literature::LiteratureAgent;
pub use query::{AgentId, DispatchPlan, DrugIntent, PlanEntry, ResearchFilters, RouteDecision, SubQuery};
pub use traits::SpecialistAgent;
