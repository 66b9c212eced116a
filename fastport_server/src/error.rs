use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use fastport_core::{CoreError, ErrorMapper};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
  #[error("IO error: {0}")]
  IOError(#[from] std::io::Error),

  #[error("session already exists: {0}")]
  AlreadyExists(String),

  #[error("session not found: {0}")]
  NotFound(String),

  #[error("invalid credentials")]
  Auth,

  #[error("session suspended: {0}")]
  Suspended(String),

  #[error("validation error: {0}")]
  Validation(String),

  #[error("storage error: {0}")]
  Storage(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("internal server error: {0}")]
  Internal(String),

  #[error("any error: {0}")]
  AnyError(#[from] anyhow::Error),
}

impl IntoResponse for BrokerError {
  fn into_response(self) -> Response {
    let (status, error_message) = match self {
      BrokerError::Auth => (StatusCode::UNAUTHORIZED, self.to_string()),
      BrokerError::AlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
      BrokerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
      BrokerError::Suspended(_) => (StatusCode::FORBIDDEN, self.to_string()),
      BrokerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
      BrokerError::Serialization(_) => (StatusCode::BAD_REQUEST, self.to_string()),
      _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
    };

    let body = Json(json!({
        "success": false,
        "error": error_message,
    }));

    (status, body).into_response()
  }
}

impl ErrorMapper for BrokerError {
  type Error = BrokerError;

  fn map_error(error: CoreError) -> Self::Error {
    match error {
      CoreError::AlreadyExists(name) => BrokerError::AlreadyExists(name),
      CoreError::NotFound(name) => BrokerError::NotFound(name),
      CoreError::Auth => BrokerError::Auth,
      CoreError::SessionSuspended(name) => BrokerError::Suspended(name),
      CoreError::Protocol(msg) => BrokerError::Validation(msg),
      CoreError::PayloadTooLarge(size) => {
        BrokerError::Validation(format!("payload too large: {size} bytes"))
      }
      CoreError::Storage(msg) => BrokerError::Storage(msg),
      CoreError::Crypto(msg) => BrokerError::Validation(msg),
      CoreError::Internal(msg) => BrokerError::Internal(msg),
    }
  }
}

impl From<CoreError> for BrokerError {
  fn from(error: CoreError) -> Self {
    BrokerError::map_error(error)
  }
}
