use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
  #[error("already exists: {0}")]
  AlreadyExists(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("authentication failed")]
  Auth,

  #[error("session suspended: {0}")]
  SessionSuspended(String),

  #[error("protocol error: {0}")]
  Protocol(String),

  #[error("payload too large: {0} bytes")]
  PayloadTooLarge(usize),

  #[error("storage error: {0}")]
  Storage(String),

  #[error("crypto error: {0}")]
  Crypto(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<sqlx::Error> for CoreError {
  fn from(e: sqlx::Error) -> Self {
    CoreError::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for CoreError {
  fn from(e: serde_json::Error) -> Self {
    CoreError::Protocol(e.to_string())
  }
}

/// Maps `CoreError` into an adapter-local error type.
pub trait ErrorMapper {
  type Error;

  fn map_error(error: CoreError) -> Self::Error;
}
