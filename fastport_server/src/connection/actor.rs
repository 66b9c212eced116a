//! Per-connection state machine.
//!
//! A connection is born `New`, becomes `Authenticated` on a valid
//! `init`, and ends `Closed`. Frame errors are local: a malformed or
//! misplaced frame gets an inline `error` reply and the connection
//! lives on. Cleanup is idempotent and runs on every exit path.

use bytes::Bytes;
use fastport_core::{crypto, ClientFrame, CoreError, DeviceToken, ServerFrame};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::{files, publish, state::AppState};

use super::ConnectionHandle;

enum ConnState {
  New,
  Authenticated {
    session: String,
    user_id: Option<String>,
  },
  /// Teardown in flight: no further frames are emitted or accepted.
  Closing,
  Closed,
}

pub struct ConnectionActor {
  app: AppState,
  handle: ConnectionHandle,
  state: ConnState,
  /// Topics this connection subscribed, for teardown.
  subscriptions: HashSet<String>,
  /// Uploads in progress: fileId → topic.
  uploads: HashMap<String, String>,
}

impl ConnectionActor {
  pub fn new(app: AppState, handle: ConnectionHandle) -> Self {
    Self {
      app,
      handle,
      state: ConnState::New,
      subscriptions: HashSet::new(),
      uploads: HashMap::new(),
    }
  }

  pub fn handle(&self) -> &ConnectionHandle {
    &self.handle
  }

  /// True once teardown has begun, locally or through a session drop
  /// closing the handle; from then on frames are ignored, not answered.
  fn winding_down(&self) -> bool {
    matches!(self.state, ConnState::Closing | ConnState::Closed) || self.handle.is_closed()
  }

  /// Feeds one text frame through the state machine.
  pub async fn on_text(&mut self, text: &str) {
    if self.winding_down() {
      return;
    }

    let frame = match ClientFrame::parse(text) {
      Ok(frame) => frame,
      Err(CoreError::Protocol(msg)) => {
        let reply = if msg.contains("unknown variant") {
          ServerFrame::error("Unknown message type")
        } else {
          ServerFrame::error(msg)
        };
        self.handle.send_frame(&reply);
        return;
      }
      Err(e) => {
        self.handle.send_frame(&ServerFrame::error(e.to_string()));
        return;
      }
    };

    match &self.state {
      ConnState::New => self.on_frame_new(frame).await,
      ConnState::Authenticated { session, user_id } => {
        let (session, user_id) = (session.clone(), user_id.clone());
        self.on_frame_authenticated(&session, user_id.as_deref(), frame).await
      }
      ConnState::Closing | ConnState::Closed => {}
    }
  }

  /// Feeds one binary frame. Only authenticated connections may stream
  /// chunks; malformed or unknown frames are dropped silently.
  pub async fn on_binary(&mut self, raw: Bytes) {
    if self.winding_down() {
      return;
    }

    match &self.state {
      ConnState::New => {
        self
          .handle
          .send_frame(&ServerFrame::error("Not initialized"));
      }
      ConnState::Authenticated { session, .. } => {
        let session = session.clone();
        files::handle_chunk(&self.app, &self.handle, &self.uploads, &session, raw);
      }
      ConnState::Closing | ConnState::Closed => {}
    }
  }

  async fn on_frame_new(&mut self, frame: ClientFrame) {
    let ClientFrame::Init {
      session_name,
      password,
      user_id,
    } = frame
    else {
      self
        .handle
        .send_frame(&ServerFrame::error("Not initialized"));
      return;
    };

    match self.app.registry.validate_init(&session_name, &password).await {
      Ok(_) => {
        self.app.subscribers.register_connection(&session_name, &self.handle);
        if let Some(user) = &user_id {
          self
            .app
            .subscribers
            .register_user(&session_name, user, &self.handle);
        }
        debug!(session = %session_name, connection = %self.handle.id(), "connection authenticated");
        self.state = ConnState::Authenticated {
          session: session_name,
          user_id,
        };
        self.handle.send_frame(&ServerFrame::InitResponse {
          success: true,
          error: None,
        });
      }
      Err(e) => {
        let error = match e {
          CoreError::Auth => "authentication failed".to_string(),
          CoreError::SessionSuspended(_) => "suspended".to_string(),
          other => other.to_string(),
        };
        self.handle.send_frame(&ServerFrame::InitResponse {
          success: false,
          error: Some(error),
        });
      }
    }
  }

  async fn on_frame_authenticated(
    &mut self,
    session: &str,
    _user_id: Option<&str>,
    frame: ClientFrame,
  ) {
    match frame {
      ClientFrame::Init { .. } => {
        self
          .handle
          .send_frame(&ServerFrame::error("Already initialized"));
      }
      ClientFrame::Subscribe { topic } => {
        self.app.subscribers.subscribe(session, &topic, &self.handle);
        self.subscriptions.insert(topic.clone());
        self.handle.send_frame(&ServerFrame::SubscribeResponse {
          success: true,
          topic,
        });
      }
      ClientFrame::Unsubscribe { topic } => {
        self.app.subscribers.unsubscribe(session, &topic, self.handle.id());
        self.subscriptions.remove(&topic);
        self.handle.send_frame(&ServerFrame::UnsubscribeResponse {
          success: true,
          topic,
        });
      }
      ClientFrame::Publish {
        topic,
        data,
        hash,
        timestamp,
        message_id,
      } => {
        let reply = publish::handle_publish(
          &self.app,
          &self.handle,
          session,
          topic,
          data,
          hash,
          timestamp,
          message_id,
        )
        .await;
        self.handle.send_frame(&reply);
      }
      ClientFrame::Ack { topic, message_id } => {
        match self.app.retry.ack(session, &topic, &message_id).await {
          Ok(Some(publisher)) if !publisher.is_closed() => {
            publisher.send_frame(&ServerFrame::AckReceived { message_id });
          }
          Ok(_) => {}
          Err(e) => debug!(session, message_id, "ack failed: {}", e),
        }
      }
      ClientFrame::InitFile {
        topic,
        file_id,
        file_name,
        file_size,
        total_chunks,
      } => {
        if let Some(reply) = files::handle_init_file(
          &self.app,
          &self.handle,
          &mut self.uploads,
          session,
          topic,
          file_id,
          file_name,
          file_size,
          total_chunks,
        )
        .await
        {
          self.handle.send_frame(&reply);
        }
      }
      ClientFrame::EndFile { topic, file_id, hash } => {
        files::handle_end_file(
          &self.app,
          &self.handle,
          &mut self.uploads,
          session,
          topic,
          file_id,
          hash,
        );
      }
      ClientFrame::RegisterFcmToken {
        user_id,
        encrypted_data,
        hash,
      } => {
        let reply = self
          .register_token(session, &user_id, &encrypted_data, &hash)
          .await;
        self.handle.send_frame(&reply);
      }
    }
  }

  /// Verifies the envelope hash, opens the envelope with the session
  /// secret, and stores the registration. The token never echoes back.
  async fn register_token(
    &self,
    session_name: &str,
    user_id: &str,
    encrypted_data: &str,
    hash: &str,
  ) -> ServerFrame {
    let failure = |error: String| ServerFrame::FcmTokenResponse {
      success: false,
      error: Some(error),
    };

    if !crypto::verify_envelope_hash(encrypted_data, hash) {
      return failure("hash mismatch".to_string());
    }

    let session = match self.app.storage.get_session(session_name).await {
      Ok(Some(session)) => session,
      Ok(None) => return failure("session unavailable".to_string()),
      Err(e) => return failure(e.to_string()),
    };

    let envelope = match crypto::decrypt_token_envelope(&session.secret_key, encrypted_data) {
      Ok(envelope) => envelope,
      Err(e) => return failure(e.to_string()),
    };

    let token = DeviceToken::new(
      session_name,
      user_id,
      &envelope.device_id,
      &envelope.token,
      &envelope.platform,
    );
    match self.app.storage.save_device_token(&token).await {
      Ok(()) => ServerFrame::FcmTokenResponse {
        success: true,
        error: None,
      },
      Err(e) => failure(e.to_string()),
    }
  }

  /// Releases everything the connection owns: Closing while the
  /// unsubscribe/user-unbind/upload cleanup runs, Closed once it is
  /// done. Idempotent; runs on every exit path including transport
  /// loss and session drop.
  pub async fn close(&mut self) {
    let session = match &self.state {
      ConnState::Closing | ConnState::Closed => return,
      ConnState::Authenticated { session, .. } => Some(session.clone()),
      ConnState::New => None,
    };
    self.state = ConnState::Closing;
    self.handle.close();

    if let Some(session) = session {
      self
        .app
        .subscribers
        .remove_connection(&session, self.handle.id());
      info!(
        session = %session,
        connection = %self.handle.id(),
        "connection.closed"
      );
    }
    self.subscriptions.clear();
    self.uploads.clear();
    self.state = ConnState::Closed;
  }
}
