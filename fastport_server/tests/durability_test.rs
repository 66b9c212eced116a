//! Best-effort durability: a failing storage back-end must never take
//! back an optimistic fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fastport_core::{
  CachedMessage, CleanupCounts, ClientFrame, CoreError, CreateSessionOpts, DeviceToken,
  ServerFrame, Session, SessionPatch, StorageAdapter,
};
use fastport_server::{
  config::AppConfig,
  connection::{ConnectionActor, ConnectionHandle, Outbound},
  AppState,
};
use serde_json::json;
use tokio::sync::mpsc;

mockall::mock! {
  Storage {}

  #[async_trait]
  impl StorageAdapter for Storage {
    async fn init(&self) -> Result<(), CoreError>;
    async fn create_session(&self, session: &Session) -> Result<(), CoreError>;
    async fn get_session(&self, name: &str) -> Result<Option<Session>, CoreError>;
    async fn update_session(&self, name: &str, patch: &SessionPatch) -> Result<(), CoreError>;
    async fn delete_session(&self, name: &str) -> Result<(), CoreError>;
    async fn list_sessions(&self) -> Result<Vec<Session>, CoreError>;
    async fn save_message(&self, message: &CachedMessage) -> Result<(), CoreError>;
    async fn get_message(&self, message_id: &str) -> Result<Option<CachedMessage>, CoreError>;
    async fn remove_message(&self, message_id: &str) -> Result<(), CoreError>;
    async fn list_pending_messages(&self, session: &str) -> Result<Vec<CachedMessage>, CoreError>;
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupCounts, CoreError>;
    async fn save_device_token(&self, token: &DeviceToken) -> Result<(), CoreError>;
    async fn get_device_tokens(&self, session: &str) -> Result<Vec<DeviceToken>, CoreError>;
    async fn get_user_device_tokens(
      &self,
      session: &str,
      user_id: &str,
    ) -> Result<Vec<DeviceToken>, CoreError>;
    async fn delete_device_token(
      &self,
      session: &str,
      user_id: &str,
      device_id: &str,
    ) -> Result<(), CoreError>;
  }
}

async fn drive(actor: &mut ConnectionActor, frame: &ClientFrame) {
  actor.on_text(&serde_json::to_string(frame).unwrap()).await;
}

fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Option<ServerFrame> {
  match rx.try_recv() {
    Ok(Outbound::Text(text)) => Some(serde_json::from_str(&text).unwrap()),
    _ => None,
  }
}

#[tokio::test]
async fn publish_survives_storage_failure() {
  let session = Session::new("s", "pw", "secret", CreateSessionOpts::default());

  let mut storage = MockStorage::new();
  let for_lookup = session.clone();
  storage
    .expect_get_session()
    .returning(move |_| Ok(Some(for_lookup.clone())));
  storage
    .expect_save_message()
    .returning(|_| Err(CoreError::Storage("db down".to_string())));

  let state = AppState::new(AppConfig::default(), Arc::new(storage));

  let (pub_handle, mut pub_rx) = ConnectionHandle::channel();
  let mut publisher = ConnectionActor::new(state.clone(), pub_handle);
  let (sub_handle, mut sub_rx) = ConnectionHandle::channel();
  let mut subscriber = ConnectionActor::new(state.clone(), sub_handle);

  for actor in [&mut publisher, &mut subscriber] {
    drive(
      actor,
      &ClientFrame::Init {
        session_name: "s".to_string(),
        password: "pw".to_string(),
        user_id: None,
      },
    )
    .await;
  }
  assert!(matches!(
    next_frame(&mut pub_rx),
    Some(ServerFrame::InitResponse { success: true, .. })
  ));
  assert!(matches!(
    next_frame(&mut sub_rx),
    Some(ServerFrame::InitResponse { success: true, .. })
  ));

  drive(
    &mut subscriber,
    &ClientFrame::Subscribe {
      topic: "t".to_string(),
    },
  )
  .await;
  assert!(matches!(
    next_frame(&mut sub_rx),
    Some(ServerFrame::SubscribeResponse { success: true, .. })
  ));

  drive(
    &mut publisher,
    &ClientFrame::Publish {
      topic: "t".to_string(),
      data: json!("X"),
      hash: "h".to_string(),
      timestamp: 1,
      message_id: "m1".to_string(),
    },
  )
  .await;

  // fan-out reached the subscriber despite the dead database
  assert!(matches!(
    next_frame(&mut sub_rx),
    Some(ServerFrame::Message { ref message_id, .. }) if message_id == "m1"
  ));
  // and the publisher was told success, durability best-effort
  assert!(matches!(
    next_frame(&mut pub_rx),
    Some(ServerFrame::PublishResponse {
      success: true,
      delivered_to: Some(1),
      ..
    })
  ));
}
