use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::session::Session;

/// An in-flight publish held for redelivery until a terminal event
/// (ack, retry ceiling, expiry, or session drop).
///
/// `data` and `hash` are opaque to the broker; clients encrypt
/// end-to-end and the cache stores whatever bytes arrived.
#[derive(Debug, Serialize, FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
  pub message_id: String,
  pub session_name: String,
  pub topic: String,
  pub data: serde_json::Value,
  pub hash: String,
  /// Client-supplied publish timestamp, forwarded verbatim.
  pub timestamp: i64,
  /// Envelope type redelivered to subscribers, normally `"message"`.
  #[serde(rename = "type")]
  #[sqlx(rename = "type")]
  pub kind: String,
  pub retry_count: i32,
  pub expiry_time: Option<DateTime<Utc>>,
  /// Retry policy captured from the session at publish time.
  pub max_retry_limit: i32,
  pub retry_interval: i64,
  pub published_at: DateTime<Utc>,
}

impl CachedMessage {
  /// Builds the cache record for a fresh publish, capturing the
  /// session's retry policy and computing the absolute expiry.
  pub fn from_publish(
    session: &Session,
    topic: &str,
    data: serde_json::Value,
    hash: &str,
    timestamp: i64,
    message_id: &str,
  ) -> Self {
    let now = Utc::now();
    Self {
      message_id: message_id.to_string(),
      session_name: session.session_name.clone(),
      topic: topic.to_string(),
      data,
      hash: hash.to_string(),
      timestamp,
      kind: "message".to_string(),
      retry_count: 0,
      expiry_time: session
        .message_expiry_time
        .map(|ttl_ms| now + Duration::milliseconds(ttl_ms)),
      max_retry_limit: session.max_retry_limit,
      retry_interval: session.retry_interval,
      published_at: now,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    matches!(self.expiry_time, Some(at) if at <= now)
  }

  /// True once the retry ceiling is reached; the initial optimistic
  /// delivery is not counted against the ceiling.
  pub fn retries_exhausted(&self) -> bool {
    self.retry_count >= self.max_retry_limit
  }

  pub fn retry_interval_ms(&self) -> u64 {
    self.retry_interval.max(0) as u64
  }
}
