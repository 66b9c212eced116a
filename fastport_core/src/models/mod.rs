pub mod device;
pub mod message;
pub mod session;

pub use device::DeviceToken;
pub use message::CachedMessage;
pub use session::{
  CreateSessionOpts, Session, SessionPatch, DEFAULT_MAX_RETRY_LIMIT, DEFAULT_RETRY_INTERVAL_MS,
};
