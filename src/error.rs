//! Error types and the client-facing error taxonomy.
//!
//! Internal faults are typed per layer (`ChatError`, `RetrievalError`,
//! `GatewayError`); every non-success outcome that reaches the client is
//! mapped through [`ErrorTag`] so raw transport errors never leak into the
//! event stream.

use axum::http::StatusCode;

/// Errors from the chat provider layer.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The provider API call failed.
    #[error("Chat API request failed: {message}")]
    ApiRequest {
        /// Human-readable failure description.
        message: String,
        /// HTTP status code, if the failure happened at the HTTP layer.
        status: Option<u16>,
    },

    /// The provider response could not be parsed into the expected shape.
    #[error("Failed to parse chat response: {message}")]
    ResponseParse {
        /// What went wrong during parsing.
        message: String,
        /// The raw response content, for diagnostics.
        content: String,
    },

    /// The call exceeded its deadline.
    #[error("Chat request timed out")]
    Timeout,

    /// No API key was configured.
    #[error("No API key configured (set KONSILIUM_API_KEY or OPENAI_API_KEY)")]
    ApiKeyMissing,

    /// The configured provider name is not supported.
    #[error("Unsupported chat provider: {name}")]
    UnsupportedProvider {
        /// The unrecognized provider name.
        name: String,
    },
}

/// Errors from a retrieval client transport.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The upstream transport failed (network, HTTP, protocol).
    #[error("Upstream transport failed: {message}")]
    Transport {
        /// Human-readable failure description.
        message: String,
    },

    /// The upstream rejected the call (bad tool name or parameters).
    #[error("Upstream rejected call: {message}")]
    Rejected {
        /// Rejection detail from the upstream.
        message: String,
    },

    /// The call exceeded the per-call deadline.
    #[error("Retrieval call timed out")]
    Timeout,

    /// The client has no usable backend (unset endpoint, missing store).
    #[error("Retrieval backend not configured: {name}")]
    NotConfigured {
        /// The client name.
        name: &'static str,
    },
}

/// Errors surfaced by the gateway workflow.
///
/// These are the only faults that terminate a request stream; everything
/// recoverable (agent failures, classifier rejection, cache misses) is
/// absorbed earlier in the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Input rejected before any work began.
    #[error("Invalid request: {message}")]
    Validation {
        /// Why the input was rejected.
        message: String,
    },

    /// The per-client token bucket is empty.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The workflow deadline expired before a final answer existed.
    #[error("Workflow deadline exceeded")]
    Timeout,

    /// An unclassified fault inside the core.
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail (never forwarded verbatim to clients).
        message: String,
    },

    /// A chat-layer fault that could not be recovered.
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// The closed client-facing error taxonomy.
///
/// Tags are what the `error` lifecycle event carries; there is no other
/// error vocabulary on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    /// Input rejected before any work began.
    ValidationError,
    /// Per-client bucket empty.
    RateLimitExceeded,
    /// Workflow or call deadline exceeded with no partial answer.
    Timeout,
    /// One or more agents failed; workflow continued with the remainder.
    /// Surfaced only through the contents of `final`, never as an event.
    UpstreamPartial,
    /// Every agent in the plan failed.
    UpstreamTotal,
    /// Unclassified fault inside the core.
    InternalError,
}

impl ErrorTag {
    /// Returns the wire representation of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Timeout => "timeout",
            Self::UpstreamPartial => "upstream_partial",
            Self::UpstreamTotal => "upstream_total",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a workflow outcome onto the taxonomy and an HTTP status.
///
/// Invoked exclusively by the gateway on non-success paths; produces the
/// material for exactly one terminating `error` event. Chat faults never
/// forward provider message bodies to the client.
#[must_use]
pub fn map_error(err: &GatewayError) -> (ErrorTag, String, StatusCode) {
    match err {
        GatewayError::Validation { message } => (
            ErrorTag::ValidationError,
            message.clone(),
            StatusCode::BAD_REQUEST,
        ),
        GatewayError::RateLimited => (
            ErrorTag::RateLimitExceeded,
            "Too many requests from this address; retry later".to_string(),
            StatusCode::TOO_MANY_REQUESTS,
        ),
        GatewayError::Timeout | GatewayError::Chat(ChatError::Timeout) => (
            ErrorTag::Timeout,
            "The request could not be completed within the time limit".to_string(),
            StatusCode::GATEWAY_TIMEOUT,
        ),
        GatewayError::Internal { .. } | GatewayError::Chat(_) => (
            ErrorTag::InternalError,
            "An internal error occurred while processing the request".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_wire_names() {
        assert_eq!(ErrorTag::ValidationError.as_str(), "validation_error");
        assert_eq!(ErrorTag::RateLimitExceeded.as_str(), "rate_limit_exceeded");
        assert_eq!(ErrorTag::Timeout.as_str(), "timeout");
        assert_eq!(ErrorTag::UpstreamPartial.as_str(), "upstream_partial");
        assert_eq!(ErrorTag::UpstreamTotal.as_str(), "upstream_total");
        assert_eq!(ErrorTag::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn test_map_validation() {
        let err = GatewayError::Validation {
            message: "query too long".to_string(),
        };
        let (tag, detail, status) = map_error(&err);
        assert_eq!(tag, ErrorTag::ValidationError);
        assert_eq!(detail, "query too long");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_map_rate_limited() {
        let (tag, _, status) = map_error(&GatewayError::RateLimited);
        assert_eq!(tag, ErrorTag::RateLimitExceeded);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_map_timeout_variants() {
        let (tag, _, _) = map_error(&GatewayError::Timeout);
        assert_eq!(tag, ErrorTag::Timeout);

        let (tag, _, _) = map_error(&GatewayError::Chat(ChatError::Timeout));
        assert_eq!(tag, ErrorTag::Timeout);
    }

    #[test]
    fn test_map_chat_error_hides_detail() {
        let err = GatewayError::Chat(ChatError::ApiRequest {
            message: "secret-internal-host refused".to_string(),
            status: Some(502),
        });
        let (tag, detail, _) = map_error(&err);
        assert_eq!(tag, ErrorTag::InternalError);
        assert!(!detail.contains("secret-internal-host"));
    }
}
