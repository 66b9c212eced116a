pub mod admin;

pub use admin::{
  create_session_handler, drop_session_handler, list_sessions_handler, suspend_session_handler,
};
