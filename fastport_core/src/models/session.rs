use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::crypto;

/// Default redelivery interval for new sessions, in milliseconds.
pub const DEFAULT_RETRY_INTERVAL_MS: i64 = 5000;
/// Default redelivery ceiling for new sessions.
pub const DEFAULT_MAX_RETRY_LIMIT: i32 = 100;

/// A tenant root. Every connection, subscription, cached message and
/// device token hangs off exactly one session.
#[derive(Debug, Serialize, FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
  pub session_name: String,
  #[serde(skip_serializing)]
  pub password: String,
  #[serde(skip_serializing)]
  pub secret_key: String,
  /// Redelivery interval in milliseconds.
  pub retry_interval: i64,
  pub max_retry_limit: i32,
  /// Message time-to-live in milliseconds; `None` means messages never
  /// expire on their own.
  pub message_expiry_time: Option<i64>,
  pub session_expiry: Option<DateTime<Utc>>,
  pub suspended: bool,
  /// Opaque offline-notifier configuration; `None` disables the hook.
  pub notifier: Option<serde_json::Value>,
  pub created_at: DateTime<Utc>,
}

impl Session {
  /// Credential check in constant time.
  pub fn verify_password(&self, password: &str) -> bool {
    crypto::ct_eq(&self.password, password)
  }

  /// Admin credential check in constant time.
  pub fn verify_secret(&self, secret_key: &str) -> bool {
    crypto::ct_eq(&self.secret_key, secret_key)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    matches!(self.session_expiry, Some(at) if at < now)
  }

  pub fn notifier_enabled(&self) -> bool {
    self.notifier.is_some()
  }
}

/// Options accepted by session creation; unset fields take the
/// documented defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionOpts {
  pub retry_interval: Option<i64>,
  pub max_retry_limit: Option<i32>,
  pub message_expiry_time: Option<i64>,
  pub session_expiry: Option<DateTime<Utc>>,
  pub notifier: Option<serde_json::Value>,
}

impl Session {
  pub fn new(name: &str, password: &str, secret_key: &str, opts: CreateSessionOpts) -> Self {
    Self {
      session_name: name.to_string(),
      password: password.to_string(),
      secret_key: secret_key.to_string(),
      retry_interval: opts.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL_MS),
      max_retry_limit: opts.max_retry_limit.unwrap_or(DEFAULT_MAX_RETRY_LIMIT),
      message_expiry_time: opts.message_expiry_time,
      session_expiry: opts.session_expiry,
      suspended: false,
      notifier: opts.notifier,
      created_at: Utc::now(),
    }
  }
}

/// Partial update applied through `StorageAdapter::update_session`.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
  pub suspended: Option<bool>,
  pub notifier: Option<serde_json::Value>,
}

impl SessionPatch {
  pub fn suspend(suspended: bool) -> Self {
    Self {
      suspended: Some(suspended),
      ..Default::default()
    }
  }

  pub fn apply(&self, session: &mut Session) {
    if let Some(suspended) = self.suspended {
      session.suspended = suspended;
    }
    if let Some(notifier) = &self.notifier {
      session.notifier = Some(notifier.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_applied_on_create() {
    let s = Session::new("s1", "pw", "deadbeef", CreateSessionOpts::default());
    assert_eq!(s.retry_interval, 5000);
    assert_eq!(s.max_retry_limit, 100);
    assert_eq!(s.message_expiry_time, None);
    assert_eq!(s.session_expiry, None);
    assert!(!s.suspended);
  }

  #[test]
  fn credentials_verified_constant_time() {
    let s = Session::new("s1", "pw", "deadbeef", CreateSessionOpts::default());
    assert!(s.verify_password("pw"));
    assert!(!s.verify_password("pW"));
    assert!(s.verify_secret("deadbeef"));
    assert!(!s.verify_secret("deadbeee"));
  }

  #[test]
  fn session_expiry_checked_against_now() {
    let mut s = Session::new("s1", "pw", "k", CreateSessionOpts::default());
    assert!(!s.is_expired(Utc::now()));
    s.session_expiry = Some(Utc::now() - chrono::Duration::seconds(1));
    assert!(s.is_expired(Utc::now()));
  }
}
