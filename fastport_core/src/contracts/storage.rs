use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
  error::CoreError,
  models::{CachedMessage, DeviceToken, Session, SessionPatch},
};

/// Result of an expiry sweep.
///
/// `sessions` carries the names of the sessions the sweep deleted so the
/// runtime can quiesce them (close connections, cancel timers) after the
/// storage pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupCounts {
  pub messages: u64,
  pub sessions: Vec<String>,
}

/// The broker's only persistence dependency.
///
/// Two conforming back-ends are provided: an in-memory map with no
/// durability, and a Postgres back-end durable across restarts. The core
/// never assumes durability, only this contract; implementations must be
/// safe for concurrent callers and linearizable per primary key.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
  /// Idempotent; creates schema if needed.
  async fn init(&self) -> Result<(), CoreError>;

  /// Fails with `CoreError::AlreadyExists` on a duplicate name.
  async fn create_session(&self, session: &Session) -> Result<(), CoreError>;

  async fn get_session(&self, name: &str) -> Result<Option<Session>, CoreError>;

  /// Last-write-wins; fails with `CoreError::NotFound`.
  async fn update_session(&self, name: &str, patch: &SessionPatch) -> Result<(), CoreError>;

  /// Also removes the session's cached messages. Idempotent.
  async fn delete_session(&self, name: &str) -> Result<(), CoreError>;

  async fn list_sessions(&self) -> Result<Vec<Session>, CoreError>;

  /// Upsert by `message_id`.
  async fn save_message(&self, message: &CachedMessage) -> Result<(), CoreError>;

  async fn get_message(&self, message_id: &str) -> Result<Option<CachedMessage>, CoreError>;

  /// Idempotent.
  async fn remove_message(&self, message_id: &str) -> Result<(), CoreError>;

  /// Messages awaiting acknowledgement for one session; used on recovery.
  async fn list_pending_messages(&self, session: &str) -> Result<Vec<CachedMessage>, CoreError>;

  /// Deletes messages with `expiry_time < now` and sessions with
  /// `session_expiry < now` (cascading to their messages).
  async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupCounts, CoreError>;

  /// Upsert by `(session_name, user_id, device_id)`.
  async fn save_device_token(&self, token: &DeviceToken) -> Result<(), CoreError>;

  /// All registrations under a session.
  async fn get_device_tokens(&self, session: &str) -> Result<Vec<DeviceToken>, CoreError>;

  async fn get_user_device_tokens(
    &self,
    session: &str,
    user_id: &str,
  ) -> Result<Vec<DeviceToken>, CoreError>;

  /// Idempotent.
  async fn delete_device_token(
    &self,
    session: &str,
    user_id: &str,
    device_id: &str,
  ) -> Result<(), CoreError>;
}
