//! Konsilium: a clinical consultation gateway.
//!
//! Accepts one clinical question over HTTP, routes it through a classifier
//! to a set of specialist retrieval agents running in parallel, merges
//! their documents into a single globally numbered citation space, and
//! streams the synthesized, cited answer back as server-sent events.
//!
//! # Architecture
//!
//! ```text
//! POST /consult → Gateway (validate, rate-limit, cache probe)
//!   → Classifier (model tier, keyword fallback) → DispatchPlan
//!   → Dispatcher → {drug, literature, guideline, general} in parallel
//!   → Synthesizer (merge, renumber, validate citations)
//!   → final + done events (cache store on the quick path)
//! ```
//!
//! The library exposes every component so the pipeline can run without the
//! HTTP layer; the `konsilium` binary wires [`workflow::RuntimeContext`]
//! from configuration and serves [`server`].

pub mod agent;
pub mod cache;
pub mod chat;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod prompt;
pub mod retrieval;
pub mod server;
pub mod synthesize;
pub mod workflow;

pub use config::{GatewayConfig, Mode};
pub use error::{ErrorTag, GatewayError};
pub use events::{FinalPayload, LifecycleEvent};
pub use workflow::{RuntimeContext, Workflow};
