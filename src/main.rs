//! Tutor backend: a homework-help service that explains, re-explains, issues
//! practice challenges and hints without handing out finished answers.
//!
//! - Axum HTTP + WebSocket API
//! - Optional OpenAI integration (via environment variables)
//!
//! Important env variables:
//!   PORT                     : u16 (default 3000)
//!   OPENAI_API_KEY           : enables OpenAI integration if present
//!   OPENAI_BASE_URL          : default "https://api.openai.com/v1"
//!   OPENAI_FAST_MODEL        : default "gpt-4o-mini"
//!   OPENAI_STRONG_MODEL      : default "gpt-4o"
//!   OPENAI_VISION_MODEL      : default is the strong model
//!   OPENAI_TRANSCRIBE_MODEL  : default "whisper-1"
//!   TUTOR_CONFIG_PATH        : path to TOML config (prompts + limits)
//!   LOG_LEVEL                : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT               : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod provider;
mod openai;
mod classifier;
mod contract;
mod controller;
mod session;
mod gate;
mod interaction;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (sessions, usage ledger, OpenAI client, prompts).
  let state = Arc::new(AppState::new());

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "tutor_backend", %addr, "HTTP server listening");
  // Peer addresses key anonymous usage when no trusted proxy is in front.
  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "tutor_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "tutor_backend", error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!(target: "tutor_backend", "Shutdown requested");
}
