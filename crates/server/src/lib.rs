pub mod auth;
pub mod chat;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod metrics;

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::auth::jwt::JwtTokenVerifier;
use crate::chat::events::TracingEventSink;
use crate::chat::{ChatHub, ChatState, MessageStore};
use crate::config::ServerConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ApiError, ErrorCode,
};
use crate::metrics::ChatMetrics;

pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Wires the chat hub, token verifier and metrics into a ready-to-serve router.
pub fn build_app(config: &ServerConfig, store: Arc<dyn MessageStore>) -> anyhow::Result<Router> {
    let verifier =
        JwtTokenVerifier::new(&config.jwt_secret).context("invalid forum JWT secret")?;
    let metrics = Arc::new(ChatMetrics::default());
    let events = Arc::new(TracingEventSink::new(metrics.clone()));
    let hub = Arc::new(ChatHub::new(store, events, config.retention));

    let chat_state = ChatState {
        hub,
        verifier: Arc::new(verifier),
        guest_username: Arc::from(config.guest_username.as_str()),
        max_frame_bytes: config.max_frame_bytes,
    };

    Ok(build_router(chat_state, metrics, config.cors_origins.as_deref()))
}

pub fn build_router(
    chat_state: ChatState,
    metrics: Arc<ChatMetrics>,
    cors_origins: Option<&str>,
) -> Router {
    let metrics_router =
        Router::new().route("/metrics", get(render_metrics)).with_state(metrics.clone());

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(metrics_router)
            .merge(chat::router(chat_state))
            .fallback(not_found),
        metrics,
    )
    .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router, metrics: Arc<ChatMetrics>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> ApiError {
    ApiError::from_code(ErrorCode::NotFound)
}

async fn render_metrics(State(metrics): State<Arc<ChatMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<ChatMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    metrics.record_http_request(method.as_str(), &path, status, latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms,
        "request completed"
    );

    response
}
