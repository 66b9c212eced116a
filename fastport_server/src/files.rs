//! File stream router: init/chunk/end framing with fileId→topic
//! routing. Stream-through only — no persistence, no retry, no expiry;
//! chunk loss is silent and client reliability is out of scope.

use bytes::Bytes;
use fastport_core::{ChunkFrame, ServerFrame};
use std::collections::HashMap;
use tracing::debug;

use crate::{connection::ConnectionHandle, state::AppState};

/// Forwards a frame to the current subscribers of `(session, topic)`,
/// excluding the sender. Send failures are silent: file traffic is
/// best-effort by contract.
fn forward_text(
  state: &AppState,
  sender: &ConnectionHandle,
  session: &str,
  topic: &str,
  frame: &ServerFrame,
) {
  for subscriber in state.subscribers.snapshot(session, topic) {
    if subscriber.id() != sender.id() {
      subscriber.send_frame(frame);
    }
  }
}

/// Starts an upload: records the fileId→topic mapping on the sender and
/// relays the announcement. Rejected when the tenant is gone or
/// suspended.
#[allow(clippy::too_many_arguments)]
pub async fn handle_init_file(
  state: &AppState,
  sender: &ConnectionHandle,
  uploads: &mut HashMap<String, String>,
  session_name: &str,
  topic: String,
  file_id: String,
  file_name: String,
  file_size: u64,
  total_chunks: u32,
) -> Option<ServerFrame> {
  match state.storage.get_session(session_name).await {
    Ok(Some(session)) if !session.suspended => {}
    Ok(_) => return Some(ServerFrame::error("session unavailable")),
    Err(e) => return Some(ServerFrame::error(e.to_string())),
  }

  uploads.insert(file_id.clone(), topic.clone());
  let relay = ServerFrame::InitFile {
    topic: topic.clone(),
    file_id,
    file_name,
    file_size,
    total_chunks,
  };
  forward_text(state, sender, session_name, &topic, &relay);
  None
}

/// Routes one binary chunk. Unknown fileIds and malformed frames are
/// dropped without a reply; valid frames forward byte-for-byte.
pub fn handle_chunk(
  state: &AppState,
  sender: &ConnectionHandle,
  uploads: &HashMap<String, String>,
  session_name: &str,
  raw: Bytes,
) {
  let Some(chunk) = ChunkFrame::parse(&raw) else {
    debug!(session = session_name, "malformed chunk frame dropped");
    return;
  };
  let Some(topic) = uploads.get(&chunk.file_id) else {
    debug!(
      session = session_name,
      file_id = %chunk.file_id,
      "chunk for unknown upload dropped"
    );
    return;
  };

  for subscriber in state.subscribers.snapshot(session_name, topic) {
    if subscriber.id() != sender.id() {
      subscriber.send_binary(raw.clone());
    }
  }
}

/// Finishes an upload: relays the envelope and forgets the mapping.
pub fn handle_end_file(
  state: &AppState,
  sender: &ConnectionHandle,
  uploads: &mut HashMap<String, String>,
  session_name: &str,
  topic: String,
  file_id: String,
  hash: Option<String>,
) {
  uploads.remove(&file_id);
  let relay = ServerFrame::EndFile {
    topic: topic.clone(),
    file_id,
    hash,
  };
  forward_text(state, sender, session_name, &topic, &relay);
}
