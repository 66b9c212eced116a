//! In-memory storage back-end. No durability; everything lives in
//! concurrent maps. The contract is identical to the durable back-end
//! and the core never assumes more than the contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fastport_core::{
  CachedMessage, CleanupCounts, CoreError, DeviceToken, Session, SessionPatch, StorageAdapter,
};

#[derive(Default)]
pub struct MemoryStorage {
  sessions: DashMap<String, Session>,
  messages: DashMap<String, CachedMessage>,
  devices: DashMap<(String, String, String), DeviceToken>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn drop_session_data(&self, name: &str) {
    self.messages.retain(|_, m| m.session_name != name);
    self.devices.retain(|(session, _, _), _| session != name);
  }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
  async fn init(&self) -> Result<(), CoreError> {
    Ok(())
  }

  async fn create_session(&self, session: &Session) -> Result<(), CoreError> {
    match self.sessions.entry(session.session_name.clone()) {
      dashmap::mapref::entry::Entry::Occupied(_) => {
        Err(CoreError::AlreadyExists(session.session_name.clone()))
      }
      dashmap::mapref::entry::Entry::Vacant(slot) => {
        slot.insert(session.clone());
        Ok(())
      }
    }
  }

  async fn get_session(&self, name: &str) -> Result<Option<Session>, CoreError> {
    Ok(self.sessions.get(name).map(|s| s.clone()))
  }

  async fn update_session(&self, name: &str, patch: &SessionPatch) -> Result<(), CoreError> {
    let mut session = self
      .sessions
      .get_mut(name)
      .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
    patch.apply(&mut session);
    Ok(())
  }

  async fn delete_session(&self, name: &str) -> Result<(), CoreError> {
    self.sessions.remove(name);
    self.drop_session_data(name);
    Ok(())
  }

  async fn list_sessions(&self) -> Result<Vec<Session>, CoreError> {
    Ok(self.sessions.iter().map(|s| s.clone()).collect())
  }

  async fn save_message(&self, message: &CachedMessage) -> Result<(), CoreError> {
    self
      .messages
      .insert(message.message_id.clone(), message.clone());
    Ok(())
  }

  async fn get_message(&self, message_id: &str) -> Result<Option<CachedMessage>, CoreError> {
    Ok(self.messages.get(message_id).map(|m| m.clone()))
  }

  async fn remove_message(&self, message_id: &str) -> Result<(), CoreError> {
    self.messages.remove(message_id);
    Ok(())
  }

  async fn list_pending_messages(&self, session: &str) -> Result<Vec<CachedMessage>, CoreError> {
    Ok(
      self
        .messages
        .iter()
        .filter(|m| m.session_name == session)
        .map(|m| m.clone())
        .collect(),
    )
  }

  async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupCounts, CoreError> {
    let before = self.messages.len();
    self.messages.retain(|_, m| !m.is_expired(now));
    let mut counts = CleanupCounts {
      messages: (before - self.messages.len()) as u64,
      sessions: Vec::new(),
    };

    let expired: Vec<String> = self
      .sessions
      .iter()
      .filter(|s| s.is_expired(now))
      .map(|s| s.session_name.clone())
      .collect();
    for name in expired {
      self.sessions.remove(&name);
      self.drop_session_data(&name);
      counts.sessions.push(name);
    }
    Ok(counts)
  }

  async fn save_device_token(&self, token: &DeviceToken) -> Result<(), CoreError> {
    let key = (
      token.session_name.clone(),
      token.user_id.clone(),
      token.device_id.clone(),
    );
    self
      .devices
      .entry(key)
      .and_modify(|existing| {
        existing.token = token.token.clone();
        existing.platform = token.platform.clone();
        existing.updated_at = token.updated_at;
      })
      .or_insert_with(|| token.clone());
    Ok(())
  }

  async fn get_device_tokens(&self, session: &str) -> Result<Vec<DeviceToken>, CoreError> {
    Ok(
      self
        .devices
        .iter()
        .filter(|t| t.session_name == session)
        .map(|t| t.clone())
        .collect(),
    )
  }

  async fn get_user_device_tokens(
    &self,
    session: &str,
    user_id: &str,
  ) -> Result<Vec<DeviceToken>, CoreError> {
    Ok(
      self
        .devices
        .iter()
        .filter(|t| t.session_name == session && t.user_id == user_id)
        .map(|t| t.clone())
        .collect(),
    )
  }

  async fn delete_device_token(
    &self,
    session: &str,
    user_id: &str,
    device_id: &str,
  ) -> Result<(), CoreError> {
    self.devices.remove(&(
      session.to_string(),
      user_id.to_string(),
      device_id.to_string(),
    ));
    Ok(())
  }
}
