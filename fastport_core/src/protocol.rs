//! The hybrid text/binary wire protocol.
//!
//! Text frames are JSON objects tagged by a `"type"` field, camelCase
//! field names. Binary frames carry file chunks:
//! `[0x02][fileId 36B ASCII][chunkIndex u32 BE][payload]`, forwarded by
//! the broker byte-for-byte.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Type byte of a binary file-chunk frame.
pub const CHUNK_TYPE_BYTE: u8 = 0x02;
/// Fixed width of the fileId field, sized for a canonical UUID string.
pub const FILE_ID_LEN: usize = 36;
/// Shortest valid binary frame: type byte + fileId + chunk index.
pub const MIN_CHUNK_FRAME_LEN: usize = 1 + FILE_ID_LEN + 4;

/// Default transport frame cap, overridable via `MAX_PAYLOAD_SIZE`.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
  #[serde(rename_all = "camelCase")]
  Init {
    session_name: String,
    password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  Subscribe { topic: String },
  #[serde(rename_all = "camelCase")]
  Unsubscribe { topic: String },
  #[serde(rename_all = "camelCase")]
  Publish {
    topic: String,
    data: serde_json::Value,
    hash: String,
    timestamp: i64,
    message_id: String,
  },
  #[serde(rename_all = "camelCase")]
  Ack { topic: String, message_id: String },
  #[serde(rename_all = "camelCase")]
  InitFile {
    topic: String,
    file_id: String,
    file_name: String,
    file_size: u64,
    total_chunks: u32,
  },
  #[serde(rename_all = "camelCase")]
  EndFile {
    topic: String,
    file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  RegisterFcmToken {
    user_id: String,
    encrypted_data: String,
    hash: String,
  },
}

impl ClientFrame {
  /// Parses a text frame. Malformed JSON or an unknown `type` is a
  /// protocol error local to this frame.
  pub fn parse(text: &str) -> Result<Self, crate::error::CoreError> {
    serde_json::from_str(text)
      .map_err(|e| crate::error::CoreError::Protocol(e.to_string()))
  }
}

/// Frames the broker sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
  #[serde(rename_all = "camelCase")]
  InitResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  SubscribeResponse { success: bool, topic: String },
  #[serde(rename_all = "camelCase")]
  UnsubscribeResponse { success: bool, topic: String },
  #[serde(rename_all = "camelCase")]
  PublishResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivered_to: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  Message {
    topic: String,
    data: serde_json::Value,
    hash: String,
    timestamp: i64,
    message_id: String,
  },
  #[serde(rename_all = "camelCase")]
  AckReceived { message_id: String },
  /// `init_file` relayed to subscribers.
  #[serde(rename_all = "camelCase")]
  InitFile {
    topic: String,
    file_id: String,
    file_name: String,
    file_size: u64,
    total_chunks: u32,
  },
  /// `end_file` relayed to subscribers.
  #[serde(rename_all = "camelCase")]
  EndFile {
    topic: String,
    file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  FcmTokenResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  #[serde(rename_all = "camelCase")]
  Error { error: String },
}

impl ServerFrame {
  pub fn error(message: impl Into<String>) -> Self {
    ServerFrame::Error {
      error: message.into(),
    }
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).expect("server frames serialize")
  }
}

/// A parsed view of a binary file-chunk frame. The broker forwards the
/// original bytes untouched; parsing exists for routing and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
  pub file_id: String,
  pub chunk_index: u32,
  pub payload: Bytes,
}

impl ChunkFrame {
  /// Parses a binary frame. Returns `None` for frames shorter than the
  /// minimum, a wrong type byte, or a non-ASCII fileId; such frames are
  /// dropped silently.
  pub fn parse(frame: &Bytes) -> Option<ChunkFrame> {
    if frame.len() < MIN_CHUNK_FRAME_LEN || frame[0] != CHUNK_TYPE_BYTE {
      return None;
    }
    let id_raw = &frame[1..1 + FILE_ID_LEN];
    if !id_raw.is_ascii() {
      return None;
    }
    let file_id = std::str::from_utf8(id_raw)
      .ok()?
      .trim_end_matches(['\0', ' '])
      .to_string();
    if file_id.is_empty() {
      return None;
    }
    let idx_off = 1 + FILE_ID_LEN;
    let chunk_index = u32::from_be_bytes([
      frame[idx_off],
      frame[idx_off + 1],
      frame[idx_off + 2],
      frame[idx_off + 3],
    ]);
    Some(ChunkFrame {
      file_id,
      chunk_index,
      payload: frame.slice(MIN_CHUNK_FRAME_LEN..),
    })
  }

  /// Encodes a chunk frame; fileIds shorter than 36 bytes are
  /// NUL-padded. This is the client half of the contract, used by tests
  /// and tooling.
  pub fn encode(file_id: &str, chunk_index: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MIN_CHUNK_FRAME_LEN + payload.len());
    buf.put_u8(CHUNK_TYPE_BYTE);
    let mut id = [0u8; FILE_ID_LEN];
    let id_bytes = file_id.as_bytes();
    let n = id_bytes.len().min(FILE_ID_LEN);
    id[..n].copy_from_slice(&id_bytes[..n]);
    buf.put_slice(&id);
    buf.put_u32(chunk_index);
    buf.put_slice(payload);
    buf.freeze()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn client_frames_use_wire_field_names() {
    let frame = ClientFrame::parse(
      r#"{"type":"init","sessionName":"s1","password":"pw","userId":"u1"}"#,
    )
    .unwrap();
    assert_eq!(
      frame,
      ClientFrame::Init {
        session_name: "s1".into(),
        password: "pw".into(),
        user_id: Some("u1".into()),
      }
    );

    let publish = ClientFrame::parse(
      r#"{"type":"publish","topic":"t","data":"X","hash":"h","timestamp":1,"messageId":"m1"}"#,
    )
    .unwrap();
    match publish {
      ClientFrame::Publish { message_id, .. } => assert_eq!(message_id, "m1"),
      other => panic!("unexpected frame: {other:?}"),
    }
  }

  #[test]
  fn unknown_type_is_a_protocol_error() {
    assert!(ClientFrame::parse(r#"{"type":"mystery"}"#).is_err());
    assert!(ClientFrame::parse("not json").is_err());
  }

  #[test]
  fn missing_required_field_is_a_protocol_error() {
    assert!(ClientFrame::parse(r#"{"type":"subscribe"}"#).is_err());
    assert!(ClientFrame::parse(r#"{"type":"ack","topic":"t"}"#).is_err());
  }

  #[test]
  fn server_frames_serialize_with_wire_names() {
    let frame = ServerFrame::PublishResponse {
      success: true,
      message_id: Some("m1".into()),
      delivered_to: Some(1),
      error: None,
    };
    let v: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
    assert_eq!(v["type"], "publish_response");
    assert_eq!(v["messageId"], "m1");
    assert_eq!(v["deliveredTo"], 1);
    assert!(v.get("error").is_none());
  }

  #[test]
  fn message_frame_carries_payload_verbatim() {
    let frame = ServerFrame::Message {
      topic: "t".into(),
      data: json!({"blob": "AAAA"}),
      hash: "h".into(),
      timestamp: 42,
      message_id: "m1".into(),
    };
    let v: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
    assert_eq!(v["data"]["blob"], "AAAA");
    assert_eq!(v["timestamp"], 42);
  }

  #[test]
  fn chunk_round_trip_with_padded_file_id() {
    let payload = vec![7u8; 4096];
    let raw = ChunkFrame::encode("F", 0, &payload);
    assert_eq!(raw.len(), MIN_CHUNK_FRAME_LEN + 4096);
    assert_eq!(raw[0], CHUNK_TYPE_BYTE);

    let parsed = ChunkFrame::parse(&raw).unwrap();
    assert_eq!(parsed.file_id, "F");
    assert_eq!(parsed.chunk_index, 0);
    assert_eq!(parsed.payload.len(), 4096);
  }

  #[test]
  fn uuid_file_id_survives_unpadded() {
    let id = "123e4567-e89b-12d3-a456-426614174000";
    assert_eq!(id.len(), FILE_ID_LEN);
    let raw = ChunkFrame::encode(id, 9, b"x");
    let parsed = ChunkFrame::parse(&raw).unwrap();
    assert_eq!(parsed.file_id, id);
    assert_eq!(parsed.chunk_index, 9);
  }

  #[test]
  fn short_or_untyped_frames_dropped() {
    assert!(ChunkFrame::parse(&Bytes::from_static(&[0x02; 40])).is_none());
    let mut wrong_type = ChunkFrame::encode("F", 0, b"p").to_vec();
    wrong_type[0] = 0x01;
    assert!(ChunkFrame::parse(&Bytes::from(wrong_type)).is_none());
  }
}
