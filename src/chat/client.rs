//! Provider registry and factory.
//!
//! Maps provider names to concrete [`ChatClient`] implementations.

use crate::chat::provider::ChatClient;
use crate::chat::providers::OpenAiChatClient;
use crate::config::GatewayConfig;
use crate::error::ChatError;

/// Creates a [`ChatClient`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"openai"` (default) — OpenAI-compatible APIs via `async-openai`
///
/// # Errors
///
/// Returns [`ChatError::UnsupportedProvider`] for unknown provider names.
pub fn create_chat_client(config: &GatewayConfig) -> Result<Box<dyn ChatClient>, ChatError> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChatClient::new(config))),
        other => Err(ChatError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_openai_client() {
        let config = GatewayConfig::builder()
            .api_key("test")
            .provider("openai")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let client = create_chat_client(&config);
        assert!(client.is_ok());
        assert_eq!(client.unwrap_or_else(|_| unreachable!()).name(), "openai");
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = GatewayConfig::builder()
            .api_key("test")
            .provider("unknown")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let result = create_chat_client(&config);
        assert!(result.is_err());
    }
}
