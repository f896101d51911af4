//! REST client for the biomedical literature service.
//!
//! The service exposes a single search resource; query parameters come from
//! the research sub-query's filters. Responses are either a bare JSON array
//! or `{"results": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Health, RetrievalClient, ToolResult};
use crate::error::RetrievalError;

/// REST client for the literature service.
pub struct LiteratureClient {
    http: reqwest::Client,
    base_url: String,
}

impl LiteratureClient {
    /// Creates a new client for the given base URL with a per-call deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Result<Self, RetrievalError> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| RetrievalError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { http, base_url })
    }

    /// Builds the search query string from tool parameters.
    ///
    /// `term` is required; every other scalar in the params object passes
    /// through as a filter (e.g. `year_from`, `max_results`).
    fn query_pairs(params: &Value) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Value::Object(map) = params {
            for (key, value) in map {
                match value {
                    Value::String(s) => pairs.push((key.clone(), s.clone())),
                    Value::Number(n) => pairs.push((key.clone(), n.to_string())),
                    Value::Bool(b) => pairs.push((key.clone(), b.to_string())),
                    _ => {}
                }
            }
        }
        pairs.sort();
        pairs
    }

    async fn search(&self, params: &Value) -> Result<Vec<Value>, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&Self::query_pairs(params))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout
                } else {
                    RetrievalError::Transport {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RetrievalError::Transport {
                message: format!("literature service returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(RetrievalError::Rejected {
                message: format!("literature service returned {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| RetrievalError::Transport {
            message: format!("malformed literature response: {e}"),
        })?;

        Ok(match body {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("results") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }
}

impl std::fmt::Debug for LiteratureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiteratureClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl RetrievalClient for LiteratureClient {
    fn name(&self) -> &'static str {
        "literature"
    }

    async fn call_tool(&self, tool: &str, params: Value) -> ToolResult {
        if tool != "search" {
            return ToolResult::from_error(&RetrievalError::Rejected {
                message: format!("unknown literature tool: {tool}"),
            });
        }
        match self.search(&params).await {
            Ok(records) => ToolResult::from_records(records),
            Err(err) => {
                tracing::warn!(tool, error = %err, "literature call failed");
                ToolResult::from_error(&err)
            }
        }
    }

    async fn health_check(&self) -> Health {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => Health::Available,
            Ok(_) | Err(_) => Health::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs_scalars_only() {
        let params = json!({
            "term": "SGLT2 heart failure",
            "year_from": 2020,
            "humans": true,
            "nested": {"ignored": 1},
        });
        let pairs = LiteratureClient::query_pairs(&params);
        assert!(pairs.contains(&("term".to_string(), "SGLT2 heart failure".to_string())));
        assert!(pairs.contains(&("year_from".to_string(), "2020".to_string())));
        assert!(pairs.contains(&("humans".to_string(), "true".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "nested"));
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = LiteratureClient::new("http://api.example/v1///", Duration::from_secs(1))
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(client.base_url, "http://api.example/v1");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_permanent() {
        let client = LiteratureClient::new("http://127.0.0.1:9", Duration::from_millis(100))
            .unwrap_or_else(|_| unreachable!());
        let result = client.call_tool("details", json!({})).await;
        assert_eq!(result.diagnostic, super::super::Diagnostic::Permanent);
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let client = LiteratureClient::new("http://127.0.0.1:9", Duration::from_millis(200))
            .unwrap_or_else(|_| unreachable!());
        let result = client.call_tool("search", json!({"term": "x"})).await;
        assert_eq!(result.diagnostic, super::super::Diagnostic::Transient);
    }
}
