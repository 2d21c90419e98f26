//! Router assembly: tutoring endpoints, WebSocket upgrade, CORS, upload limit, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (one connection is one session)
/// - tutoring endpoints under `/tutoring/...`
/// - multipart uploads at `/image-analysis` and `/transcribe`
/// - CORS (allow any origin/method/headers); tighten for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Multipart bodies carry a little framing on top of the file itself.
    let body_limit = state.limits.max_upload_bytes + 64 * 1024;

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/health", get(http::http_health))
        .route("/tutoring/ask", post(http::http_post_ask))
        .route("/tutoring/reexplain", post(http::http_post_reexplain))
        .route("/tutoring/challenge", post(http::http_post_challenge))
        .route("/tutoring/hint", post(http::http_post_hint))
        .route("/tutoring/session", delete(http::http_delete_session))
        .route("/image-analysis", post(http::http_post_image_analysis))
        .route("/transcribe", post(http::http_post_transcribe))
        // State + body limit + CORS + HTTP tracing
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
