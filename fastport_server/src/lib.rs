//! # fastPort Server
//!
//! Multi-tenant pub/sub broker over a websocket frame transport:
//! - config -> state -> connection/publish/files runtime
//! - storage selected once at startup (memory or postgres)
//! - admin REST adapter and health endpoint on the same listener

pub mod config;
pub mod connection;
pub mod error;
pub mod files;
pub mod handlers;
pub mod publish;
pub mod registry;
pub mod retry;
pub mod state;
pub mod storage;
pub mod subscribers;
pub mod sweeper;

pub use config::AppConfig;
pub use error::BrokerError;
pub use state::AppState;

use anyhow::Result;
use axum::{
  response::IntoResponse,
  routing::{delete, get, patch, post},
  Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Builds the application state and router, runs storage init and
/// retry recovery, and spawns the expiry sweeper.
pub async fn get_router(config: AppConfig) -> Result<(Router, AppState)> {
  let storage = storage::build_storage(&config).await?;
  storage.init().await?;

  let state = AppState::new(config, storage);

  let recovered = state.retry.recover().await?;
  if recovered > 0 {
    tracing::info!(recovered, "retry recovery finished");
  }

  sweeper::spawn(state.clone());

  // admin REST adapter: request tracing plus permissive CORS for the
  // admin UI; both are adapter concerns, the core never sees them
  let admin_routes = Router::new()
    .route("/api/sessions", post(handlers::create_session_handler))
    .route("/api/sessions", get(handlers::list_sessions_handler))
    .route("/api/sessions/{name}", delete(handlers::drop_session_handler))
    .route(
      "/api/sessions/{name}/suspend",
      patch(handlers::suspend_session_handler),
    )
    .layer(CorsLayer::permissive());

  let app = Router::new()
    .route("/ws", get(connection::ws_handler))
    .route("/health", get(health_check))
    .merge(admin_routes)
    .layer(TraceLayer::new_for_http())
    .with_state(state.clone());

  Ok((app, state))
}

async fn health_check() -> impl IntoResponse {
  axum::Json(serde_json::json!({
      "status": "healthy",
      "service": "fastport_server",
      "version": env!("CARGO_PKG_VERSION"),
      "timestamp": chrono::Utc::now().to_rfc3339(),
  }))
}
