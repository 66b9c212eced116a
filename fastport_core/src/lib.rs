//! # fastPort Core
//!
//! Shared domain types and contracts for the fastPort broker:
//! - models: sessions, cached messages, device tokens
//! - contracts: the storage port and the offline-notifier port
//! - protocol: the hybrid text/binary wire frames
//! - crypto: secret generation, envelope verification, token envelopes
//!
//! The runtime lives in `fastport_server`; this crate does no I/O.

pub mod contracts;
pub mod crypto;
pub mod error;
pub mod models;
pub mod protocol;

pub use contracts::{CleanupCounts, NoopNotifier, OfflineNotifier, StorageAdapter};
pub use error::{CoreError, ErrorMapper};
pub use models::{
  CachedMessage, CreateSessionOpts, DeviceToken, Session, SessionPatch, DEFAULT_MAX_RETRY_LIMIT,
  DEFAULT_RETRY_INTERVAL_MS,
};
pub use protocol::{
  ChunkFrame, ClientFrame, ServerFrame, CHUNK_TYPE_BYTE, DEFAULT_MAX_PAYLOAD, FILE_ID_LEN,
  MIN_CHUNK_FRAME_LEN,
};
