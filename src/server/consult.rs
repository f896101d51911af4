//! `POST /consult` — the streaming consultation endpoint.
//!
//! The handler validates, rate-limits, probes the cache, then hands the
//! workflow to a task that feeds a bounded event channel. This module is
//! the only place events become SSE frames; a terminal event closes the
//! stream and anything written after it is suppressed. Dropping the
//! response body (client disconnect) cancels the workflow through a
//! cancellation-token guard.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{AppState, RequestId};
use crate::cache::fingerprint;
use crate::config::Mode;
use crate::error::{GatewayError, map_error};
use crate::events::LifecycleEvent;
use crate::server::validate::validate_query;

/// Bound on the internal lifecycle event channel. Producers block on push
/// when a consumer is slow, which is the back-pressure the stream needs.
const EVENT_BUFFER: usize = 16;

/// SSE keep-alive interval.
const KEEP_ALIVE_SECS: u64 = 15;

/// Consultation request body.
#[derive(Debug, Deserialize)]
pub struct ConsultRequest {
    /// The clinical question, 1–1000 characters.
    pub query: String,
    /// Pipeline mode; the configured default applies when omitted.
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Optional caller identifier, logged only.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Handles one consultation request.
pub async fn consult(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<ConsultRequest>,
) -> Response {
    let query = match validate_query(&body.query) {
        Ok(query) => query,
        Err(err) => return terminal_error_response(&err, request_id),
    };

    if !state.limiter.try_acquire(addr.ip()) {
        return terminal_error_response(&GatewayError::RateLimited, request_id);
    }

    let mode = body.mode.unwrap_or(state.ctx.config.mode);
    tracing::info!(
        %request_id,
        client = %addr.ip(),
        mode = mode.as_str(),
        user_id = body.user_id.as_deref().unwrap_or("-"),
        "consult accepted"
    );

    // Quick mode is the only cacheable pipeline; probe errors are misses.
    let cache_key = fingerprint(&query, mode);
    if mode == Mode::Quick {
        match state.cache.probe(&cache_key).await {
            Ok(Some(payload)) => {
                tracing::debug!(%request_id, "cache hit");
                return static_event_response(
                    vec![
                        LifecycleEvent::CacheHit,
                        LifecycleEvent::Final(payload),
                        LifecycleEvent::Done,
                    ],
                    request_id,
                    StatusCode::OK,
                );
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%request_id, error = %err, "cache probe failed, treating as miss");
            }
        }
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let workflow_cancel = cancel.clone();

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let result = task_state
            .workflow
            .run(&task_state.ctx, request_id, &query, &tx, &workflow_cancel)
            .await;

        match result {
            Ok(payload) => {
                let _ = tx.send(LifecycleEvent::Final(payload.clone())).await;
                let _ = tx.send(LifecycleEvent::Done).await;

                // Store after the final flush, fire-and-forget: a cache
                // write failure must never reach the client.
                if mode == Mode::Quick {
                    let cache = Arc::clone(&task_state.cache);
                    let ttl = task_state.ctx.config.cache_ttl;
                    tokio::spawn(async move {
                        if let Err(err) = cache.store(&cache_key, payload, ttl).await {
                            tracing::warn!(%request_id, error = %err, "cache store failed");
                        }
                    });
                }
            }
            Err(err) => {
                tracing::warn!(%request_id, error = %err, "workflow failed");
                let (tag, detail, _) = map_error(&err);
                let _ = tx
                    .send(LifecycleEvent::Error {
                        error: tag,
                        detail,
                    })
                    .await;
            }
        }
    });

    // The guard cancels the workflow when the client goes away.
    let guard = cancel.drop_guard();
    let stream = terminate_after_terminal(ReceiverStream::new(rx)).map(move |event| {
        let _ = &guard;
        Ok::<Event, Infallible>(to_sse_event(&event, request_id))
    });

    Sse::new(stream)
        .keep_alive(keep_alive())
        .into_response()
}

/// Ends the stream after the first terminal event; later writes vanish.
fn terminate_after_terminal(
    stream: impl Stream<Item = LifecycleEvent>,
) -> impl Stream<Item = LifecycleEvent> {
    stream.scan(false, |terminated, event| {
        let next = if *terminated {
            None
        } else {
            *terminated = event.is_terminal();
            Some(event)
        };
        futures_util::future::ready(next)
    })
}

fn to_sse_event(event: &LifecycleEvent, request_id: Uuid) -> Event {
    Event::default()
        .id(request_id.to_string())
        .event(event.kind())
        .data(event.data().to_string())
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(std::time::Duration::from_secs(KEEP_ALIVE_SECS))
        .text("ping")
}

/// A short pre-workflow stream (cache hit or immediate rejection).
fn static_event_response(
    events: Vec<LifecycleEvent>,
    request_id: Uuid,
    status: StatusCode,
) -> Response {
    let stream = tokio_stream::iter(events)
        .map(move |event| Ok::<Event, Infallible>(to_sse_event(&event, request_id)));

    let mut response = Sse::new(stream).into_response();
    *response.status_mut() = status;
    response
}

/// Maps a pre-workflow failure to its single terminal `error` event.
fn terminal_error_response(err: &GatewayError, request_id: Uuid) -> Response {
    let (tag, detail, status) = map_error(err);
    tracing::debug!(%request_id, tag = tag.as_str(), "request rejected");
    static_event_response(
        vec![LifecycleEvent::Error {
            error: tag,
            detail,
        }],
        request_id,
        status,
    )
}
