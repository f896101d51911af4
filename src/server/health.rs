//! `GET /health` — upstream and cache health aggregation.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use super::AppState;
use crate::retrieval::Health;

/// Cache probe key used only by the health endpoint.
const CACHE_PROBE_KEY: &str = "health-probe";

/// Reports gateway health: `degraded` iff any upstream is unavailable.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.ctx.snapshot_health().await;

    let cache = match state.cache.probe(CACHE_PROBE_KEY).await {
        Ok(_) => "available".to_string(),
        Err(err) => format!("error: {err}"),
    };

    let degraded = [snapshot.drug, snapshot.literature, snapshot.guideline]
        .iter()
        .any(|h| *h == Health::Unavailable);

    Json(json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "upstreams": {
            "drug": snapshot.drug.as_str(),
            "literature": snapshot.literature.as_str(),
            "guideline": snapshot.guideline.as_str(),
        },
        "cache": cache,
    }))
}
