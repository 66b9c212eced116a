//! Postgres storage back-end, durable across restarts.
//!
//! Schema lives here and `init` is idempotent DDL. Concurrency and
//! per-key linearizability come from the database; the pool is shared
//! freely across tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastport_core::{
  CachedMessage, CleanupCounts, CoreError, DeviceToken, Session, SessionPatch, StorageAdapter,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::info;

pub struct PgStorage {
  pool: PgPool,
}

impl PgStorage {
  pub async fn connect(url: &str) -> Result<Self, CoreError> {
    let pool = PgPoolOptions::new()
      .max_connections(10)
      .connect(url)
      .await?;
    Ok(Self { pool })
  }

  pub fn with_pool(pool: PgPool) -> Self {
    Self { pool }
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
  session_name        TEXT PRIMARY KEY,
  password            TEXT NOT NULL,
  secret_key          TEXT NOT NULL,
  retry_interval      BIGINT NOT NULL,
  max_retry_limit     INT NOT NULL,
  message_expiry_time BIGINT,
  session_expiry      TIMESTAMPTZ,
  suspended           BOOLEAN NOT NULL DEFAULT FALSE,
  notifier            JSONB,
  created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS messages (
  message_id      TEXT PRIMARY KEY,
  session_name    TEXT NOT NULL REFERENCES sessions (session_name) ON DELETE CASCADE,
  topic           TEXT NOT NULL,
  data            JSONB NOT NULL,
  hash            TEXT NOT NULL,
  timestamp       BIGINT NOT NULL,
  type            TEXT NOT NULL,
  retry_count     INT NOT NULL DEFAULT 0,
  expiry_time     TIMESTAMPTZ,
  max_retry_limit INT NOT NULL,
  retry_interval  BIGINT NOT NULL,
  published_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_name);
CREATE INDEX IF NOT EXISTS idx_messages_expiry ON messages (expiry_time) WHERE expiry_time IS NOT NULL;

CREATE TABLE IF NOT EXISTS device_tokens (
  session_name TEXT NOT NULL REFERENCES sessions (session_name) ON DELETE CASCADE,
  user_id      TEXT NOT NULL,
  device_id    TEXT NOT NULL,
  token        TEXT NOT NULL,
  platform     TEXT NOT NULL,
  created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
  PRIMARY KEY (session_name, user_id, device_id)
);
"#;

#[async_trait]
impl StorageAdapter for PgStorage {
  async fn init(&self) -> Result<(), CoreError> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    info!("postgres schema ready");
    Ok(())
  }

  async fn create_session(&self, session: &Session) -> Result<(), CoreError> {
    let result = sqlx::query(
      r#"INSERT INTO sessions
           (session_name, password, secret_key, retry_interval, max_retry_limit,
            message_expiry_time, session_expiry, suspended, notifier, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (session_name) DO NOTHING"#,
    )
    .bind(&session.session_name)
    .bind(&session.password)
    .bind(&session.secret_key)
    .bind(session.retry_interval)
    .bind(session.max_retry_limit)
    .bind(session.message_expiry_time)
    .bind(session.session_expiry)
    .bind(session.suspended)
    .bind(&session.notifier)
    .bind(session.created_at)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(CoreError::AlreadyExists(session.session_name.clone()));
    }
    Ok(())
  }

  async fn get_session(&self, name: &str) -> Result<Option<Session>, CoreError> {
    let session = sqlx::query_as::<_, Session>(
      "SELECT * FROM sessions WHERE session_name = $1",
    )
    .bind(name)
    .fetch_optional(&self.pool)
    .await?;
    Ok(session)
  }

  async fn update_session(&self, name: &str, patch: &SessionPatch) -> Result<(), CoreError> {
    let result = sqlx::query(
      r#"UPDATE sessions
         SET suspended = COALESCE($2, suspended),
             notifier = COALESCE($3, notifier)
         WHERE session_name = $1"#,
    )
    .bind(name)
    .bind(patch.suspended)
    .bind(&patch.notifier)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(CoreError::NotFound(name.to_string()));
    }
    Ok(())
  }

  async fn delete_session(&self, name: &str) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM sessions WHERE session_name = $1")
      .bind(name)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn list_sessions(&self) -> Result<Vec<Session>, CoreError> {
    let sessions = sqlx::query_as::<_, Session>(
      "SELECT * FROM sessions ORDER BY created_at",
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(sessions)
  }

  async fn save_message(&self, message: &CachedMessage) -> Result<(), CoreError> {
    sqlx::query(
      r#"INSERT INTO messages
           (message_id, session_name, topic, data, hash, timestamp, type,
            retry_count, expiry_time, max_retry_limit, retry_interval, published_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (message_id) DO UPDATE
         SET session_name = EXCLUDED.session_name,
             topic = EXCLUDED.topic,
             data = EXCLUDED.data,
             hash = EXCLUDED.hash,
             timestamp = EXCLUDED.timestamp,
             type = EXCLUDED.type,
             retry_count = EXCLUDED.retry_count,
             expiry_time = EXCLUDED.expiry_time,
             max_retry_limit = EXCLUDED.max_retry_limit,
             retry_interval = EXCLUDED.retry_interval,
             published_at = EXCLUDED.published_at"#,
    )
    .bind(&message.message_id)
    .bind(&message.session_name)
    .bind(&message.topic)
    .bind(&message.data)
    .bind(&message.hash)
    .bind(message.timestamp)
    .bind(&message.kind)
    .bind(message.retry_count)
    .bind(message.expiry_time)
    .bind(message.max_retry_limit)
    .bind(message.retry_interval)
    .bind(message.published_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_message(&self, message_id: &str) -> Result<Option<CachedMessage>, CoreError> {
    let message = sqlx::query_as::<_, CachedMessage>(
      "SELECT * FROM messages WHERE message_id = $1",
    )
    .bind(message_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(message)
  }

  async fn remove_message(&self, message_id: &str) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM messages WHERE message_id = $1")
      .bind(message_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn list_pending_messages(&self, session: &str) -> Result<Vec<CachedMessage>, CoreError> {
    let messages = sqlx::query_as::<_, CachedMessage>(
      "SELECT * FROM messages WHERE session_name = $1 ORDER BY published_at",
    )
    .bind(session)
    .fetch_all(&self.pool)
    .await?;
    Ok(messages)
  }

  async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupCounts, CoreError> {
    let removed = sqlx::query("DELETE FROM messages WHERE expiry_time IS NOT NULL AND expiry_time < $1")
      .bind(now)
      .execute(&self.pool)
      .await?;

    let expired = sqlx::query(
      "DELETE FROM sessions WHERE session_expiry IS NOT NULL AND session_expiry < $1 RETURNING session_name",
    )
    .bind(now)
    .fetch_all(&self.pool)
    .await?;

    Ok(CleanupCounts {
      messages: removed.rows_affected(),
      sessions: expired
        .iter()
        .map(|row| row.get::<String, _>("session_name"))
        .collect(),
    })
  }

  async fn save_device_token(&self, token: &DeviceToken) -> Result<(), CoreError> {
    sqlx::query(
      r#"INSERT INTO device_tokens
           (session_name, user_id, device_id, token, platform, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (session_name, user_id, device_id) DO UPDATE
         SET token = EXCLUDED.token,
             platform = EXCLUDED.platform,
             updated_at = EXCLUDED.updated_at"#,
    )
    .bind(&token.session_name)
    .bind(&token.user_id)
    .bind(&token.device_id)
    .bind(&token.token)
    .bind(&token.platform)
    .bind(token.created_at)
    .bind(token.updated_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_device_tokens(&self, session: &str) -> Result<Vec<DeviceToken>, CoreError> {
    let tokens = sqlx::query_as::<_, DeviceToken>(
      "SELECT * FROM device_tokens WHERE session_name = $1",
    )
    .bind(session)
    .fetch_all(&self.pool)
    .await?;
    Ok(tokens)
  }

  async fn get_user_device_tokens(
    &self,
    session: &str,
    user_id: &str,
  ) -> Result<Vec<DeviceToken>, CoreError> {
    let tokens = sqlx::query_as::<_, DeviceToken>(
      "SELECT * FROM device_tokens WHERE session_name = $1 AND user_id = $2",
    )
    .bind(session)
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(tokens)
  }

  async fn delete_device_token(
    &self,
    session: &str,
    user_id: &str,
    device_id: &str,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "DELETE FROM device_tokens WHERE session_name = $1 AND user_id = $2 AND device_id = $3",
    )
    .bind(session)
    .bind(user_id)
    .bind(device_id)
    .execute(&self.pool)
    .await?;
    Ok(())
  }
}
