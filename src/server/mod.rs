//! HTTP gateway: router, middleware, and serving.
//!
//! Two routes: `POST /consult` (SSE consultation stream) and `GET /health`.
//! Every response carries the request id, processing time, and a fixed set
//! of security headers; CORS comes from configuration. The gateway is the
//! only component that writes to the external stream.

pub mod consult;
pub mod health;
pub mod rate_limit;
pub mod validate;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::workflow::{RuntimeContext, Workflow};

pub use rate_limit::RateLimiter;

/// Request identifier middleware attaches to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared server state.
pub struct AppState {
    /// Long-lived client handles and configuration.
    pub ctx: Arc<RuntimeContext>,
    /// Wired pipeline shared by all requests.
    pub workflow: Workflow,
    /// Final-result cache.
    pub cache: Arc<dyn ResultCache>,
    /// Per-address token buckets.
    pub limiter: RateLimiter,
}

impl AppState {
    /// Builds server state from a runtime context.
    #[must_use]
    pub fn new(ctx: RuntimeContext, cache: Arc<dyn ResultCache>) -> Self {
        let workflow = Workflow::new(&ctx);
        let limiter = RateLimiter::new(ctx.config.rate_limit_per_minute);
        Self {
            ctx: Arc::new(ctx),
            workflow,
            cache,
            limiter,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// Builds the router with middleware attached.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.ctx.config.cors_origins);

    Router::new()
        .route("/consult", post(consult::consult))
        .route("/health", get(health::health))
        .layer(middleware::from_fn(common_headers))
        .layer(cors)
        .with_state(state)
}

/// Serves the gateway until ctrl-c.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let router = build_router(state);

    tracing::info!("consultation gateway listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    Ok(())
}

/// Stamps the request id, processing time, and security headers.
async fn common_headers(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&request_id.0.to_string()) {
        headers.insert("x-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&started.elapsed().as_millis().to_string()) {
        headers.insert("x-processing-time-ms", value);
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    // Meaningful only once TLS terminates in front of the gateway.
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );

    response
}

/// CORS from configuration; an empty origin list means wildcard.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}
