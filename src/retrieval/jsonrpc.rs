//! JSON-RPC 2.0 client for the pharmaceutical registry.
//!
//! The registry exposes `search`, `details`, and `reimbursement` methods
//! over JSON-RPC 2.0 on HTTP. Request identifiers come from an atomic
//! counter, so id generation stays lock-free and monotonic under
//! concurrent use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Health, RetrievalClient, ToolResult};
use crate::error::RetrievalError;

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client for the pharmaceutical registry.
pub struct DrugRegistryClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl DrugRegistryClient {
    /// Creates a new client for the given endpoint with a per-call deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: impl Into<String>, deadline: Duration) -> Result<Self, RetrievalError> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| RetrievalError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issues one JSON-RPC call and unwraps the result into records.
    async fn call(&self, method: &str, params: &Value) -> Result<Vec<Value>, RetrievalError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
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
        if status.is_server_error() {
            return Err(RetrievalError::Transport {
                message: format!("registry returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(RetrievalError::Rejected {
                message: format!("registry returned {status}"),
            });
        }

        let body: RpcResponse = response.json().await.map_err(|e| RetrievalError::Transport {
            message: format!("malformed JSON-RPC response: {e}"),
        })?;

        if let Some(err) = body.error {
            // -32000..-32099 is the reserved server-error band; everything
            // else (parse error, invalid params, method not found) is a
            // caller mistake and not worth retrying.
            return if (-32_099..=-32_000).contains(&err.code) {
                Err(RetrievalError::Transport {
                    message: format!("registry error {}: {}", err.code, err.message),
                })
            } else {
                Err(RetrievalError::Rejected {
                    message: format!("registry error {}: {}", err.code, err.message),
                })
            };
        }

        Ok(Self::records_from_result(body.result))
    }

    /// Normalizes a JSON-RPC `result` into a flat record list.
    ///
    /// The registry returns either `{"records": [...]}`, a bare array, or a
    /// single object for `details`-style methods.
    fn records_from_result(result: Option<Value>) -> Vec<Value> {
        match result {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(Value::Object(map)) => {
                if let Some(Value::Array(items)) = map.get("records") {
                    items.clone()
                } else {
                    vec![Value::Object(map)]
                }
            }
            Some(other) => vec![other],
        }
    }
}

impl std::fmt::Debug for DrugRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrugRegistryClient")
            .field("endpoint", &self.endpoint)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl RetrievalClient for DrugRegistryClient {
    fn name(&self) -> &'static str {
        "drug"
    }

    async fn call_tool(&self, tool: &str, params: Value) -> ToolResult {
        match self.call(tool, &params).await {
            Ok(records) => ToolResult::from_records(records),
            Err(err) => {
                tracing::warn!(tool, error = %err, "drug registry call failed");
                ToolResult::from_error(&err)
            }
        }
    }

    async fn health_check(&self) -> Health {
        match self.call("status", &Value::Null).await {
            Ok(records) => {
                let degraded = records.first().is_some_and(|r| {
                    r.get("status").and_then(Value::as_str) == Some("degraded")
                });
                if degraded {
                    Health::Degraded
                } else {
                    Health::Available
                }
            }
            Err(_) => Health::Unavailable,
        }
    }
}
