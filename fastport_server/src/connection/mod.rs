pub mod actor;
pub mod handle;
pub mod ws;

pub use actor::ConnectionActor;
pub use handle::{ConnectionHandle, Outbound, OUTBOUND_QUEUE_DEPTH};
pub use ws::ws_handler;
