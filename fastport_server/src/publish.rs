//! Publish pipeline: tenancy check, optimistic fan-out, best-effort
//! persistence, offline-push hook, publisher ack.

use std::collections::HashSet;
use std::time::Duration;

use fastport_core::{CachedMessage, ServerFrame};
use tracing::{debug, info, warn};

use crate::{connection::ConnectionHandle, state::AppState};

/// Total deadline for the offline-notifier pass of one publish.
const NOTIFIER_DEADLINE: Duration = Duration::from_secs(5);

/// Runs one publish through the pipeline and returns the response frame
/// for the publisher.
pub async fn handle_publish(
  state: &AppState,
  sender: &ConnectionHandle,
  session_name: &str,
  topic: String,
  data: serde_json::Value,
  hash: String,
  timestamp: i64,
  message_id: String,
) -> ServerFrame {
  // Tenancy gate: missing or suspended tenants reject the publish.
  let session = match state.storage.get_session(session_name).await {
    Ok(Some(session)) if session.suspended => {
      return ServerFrame::PublishResponse {
        success: false,
        message_id: Some(message_id),
        delivered_to: None,
        error: Some("suspended".to_string()),
      };
    }
    Ok(Some(session)) => session,
    Ok(None) => {
      return ServerFrame::PublishResponse {
        success: false,
        message_id: Some(message_id),
        delivered_to: None,
        error: Some("unknown session".to_string()),
      };
    }
    Err(e) => {
      return ServerFrame::PublishResponse {
        success: false,
        message_id: Some(message_id),
        delivered_to: None,
        error: Some(e.to_string()),
      };
    }
  };

  // Optimistic fan-out before any persistence, from a snapshot taken
  // without holding the index lock across sends.
  let frame = ServerFrame::Message {
    topic: topic.clone(),
    data: data.clone(),
    hash: hash.clone(),
    timestamp,
    message_id: message_id.clone(),
  };
  let mut delivered = 0usize;
  for subscriber in state.subscribers.snapshot(session_name, &topic) {
    if subscriber.id() == sender.id() || subscriber.is_closed() {
      continue;
    }
    if subscriber.send_frame(&frame) {
      delivered += 1;
    } else {
      warn!(
        session = session_name,
        topic, message_id, "per-subscriber send failed during fan-out"
      );
    }
  }
  info!(
    session = session_name,
    topic, message_id, delivered, "publish.delivered"
  );

  // Cache and arm retries only when someone was reached; a no-audience
  // publish caches nothing and arms nothing. Storage trouble never
  // takes back the optimistic delivery.
  if delivered > 0 {
    let message = CachedMessage::from_publish(
      &session,
      &topic,
      data,
      &hash,
      timestamp,
      &message_id,
    );
    if let Err(e) = state.retry.track(&message, Some(sender.clone())).await {
      warn!(
        message_id,
        session = session_name,
        "publish persisted best-effort only: {}",
        e
      );
    }
  }

  if session.notifier_enabled() {
    spawn_offline_push(state.clone(), session_name.to_string(), topic.clone());
  }

  ServerFrame::PublishResponse {
    success: true,
    message_id: Some(message_id),
    delivered_to: Some(delivered),
    error: None,
  }
}

/// Fire-and-forget push for users registered on the session but not
/// currently online. Bounded by one total deadline; errors are
/// swallowed.
fn spawn_offline_push(state: AppState, session_name: String, topic: String) {
  tokio::spawn(async move {
    let push = async {
      let tokens = match state.storage.get_device_tokens(&session_name).await {
        Ok(tokens) => tokens,
        Err(e) => {
          debug!(session = %session_name, "offline push skipped: {}", e);
          return;
        }
      };
      let online = state.subscribers.online_users(&session_name);
      let offline_users: HashSet<&str> = tokens
        .iter()
        .map(|t| t.user_id.as_str())
        .filter(|user| !online.contains(*user))
        .collect();
      for user in offline_users {
        if let Err(e) = state.notifier.push_offline(&session_name, user, &topic).await {
          debug!(session = %session_name, user, "offline push failed: {}", e);
        }
      }
    };
    if tokio::time::timeout(NOTIFIER_DEADLINE, push).await.is_err() {
      debug!(session = %session_name, topic, "offline push timed out");
    }
  });
}
