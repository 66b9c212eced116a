//! Admin control surface: a thin REST adapter over the session
//! registry. Transport shape only — every decision lives in the core.

use axum::{
  extract::{Path, State},
  Json,
};
use fastport_core::CreateSessionOpts;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::BrokerError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
  pub session_name: String,
  pub password: String,
  #[serde(flatten)]
  pub opts: CreateSessionOpts,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
  pub password: String,
  pub secret_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendRequest {
  pub password: String,
  pub secret_key: String,
  pub suspend: bool,
}

pub async fn create_session_handler(
  State(state): State<AppState>,
  Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Value>, BrokerError> {
  let session = state
    .registry
    .create_session(&req.session_name, &req.password, req.opts)
    .await?;

  // The one place credentials are returned: the creation response.
  Ok(Json(json!({
      "success": true,
      "sessionName": session.session_name,
      "password": session.password,
      "secretKey": session.secret_key,
  })))
}

pub async fn drop_session_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  Json(creds): Json<Credentials>,
) -> Result<Json<Value>, BrokerError> {
  state
    .registry
    .drop_session(&name, &creds.password, &creds.secret_key)
    .await?;
  Ok(Json(json!({ "success": true })))
}

pub async fn suspend_session_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  Json(req): Json<SuspendRequest>,
) -> Result<Json<Value>, BrokerError> {
  state
    .registry
    .suspend_session(&name, &req.password, &req.secret_key, req.suspend)
    .await?;
  Ok(Json(json!({ "success": true, "suspended": req.suspend })))
}

/// Session records sans credentials (`Session` serialization skips
/// them).
pub async fn list_sessions_handler(
  State(state): State<AppState>,
) -> Result<Json<Value>, BrokerError> {
  let sessions = state.registry.list_sessions().await?;
  Ok(Json(json!({ "success": true, "sessions": sessions })))
}
