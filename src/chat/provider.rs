//! Pluggable chat client trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. The classifier and synthesizer only ever
//! see this trait, so the LLM vendor is swappable without touching them.

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use crate::error::ChatError;

/// Trait for chat completion backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls) for a
/// specific provider while presenting a uniform interface. Callers carry
/// the workflow deadline by wrapping calls in `tokio::time::timeout`;
/// implementations must stay cancel-safe at every await point.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// Structured outputs (classification) set `json_mode` on the request;
    /// free-form generation (synthesis, translation) leaves it unset.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError`] on API failures, timeouts, or malformed
    /// responses.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError>;
}
