use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A push-notification device registration, keyed by
/// `(session_name, user_id, device_id)`.
#[derive(Debug, Serialize, FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
  pub session_name: String,
  pub user_id: String,
  pub device_id: String,
  pub token: String,
  pub platform: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl DeviceToken {
  pub fn new(session: &str, user_id: &str, device_id: &str, token: &str, platform: &str) -> Self {
    let now = Utc::now();
    Self {
      session_name: session.to_string(),
      user_id: user_id.to_string(),
      device_id: device_id.to_string(),
      token: token.to_string(),
      platform: platform.to_string(),
      created_at: now,
      updated_at: now,
    }
  }
}
