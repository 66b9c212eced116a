use bytes::Bytes;
use fastport_core::protocol::ServerFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound queue depth per connection. Overflow drops the frame; one
/// slow subscriber never blocks another.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// What the transport writer drains from the outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
  Text(String),
  Binary(Bytes),
  Close,
}

/// Cheap, cloneable sender half of a connection. Fan-out paths hold
/// these; the transport task owns the receiving end.
#[derive(Clone)]
pub struct ConnectionHandle {
  inner: Arc<HandleInner>,
}

struct HandleInner {
  id: Uuid,
  outbound: mpsc::Sender<Outbound>,
  closed: AtomicBool,
}

impl ConnectionHandle {
  pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
    Self {
      inner: Arc::new(HandleInner {
        id: Uuid::new_v4(),
        outbound,
        closed: AtomicBool::new(false),
      }),
    }
  }

  /// Creates a handle together with its outbound receiver; the caller
  /// hands the receiver to a transport writer (or a test harness).
  pub fn channel() -> (Self, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    (Self::new(tx), rx)
  }

  pub fn id(&self) -> Uuid {
    self.inner.id
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::Acquire)
  }

  /// Queues a text frame. Best-effort: a full queue drops the frame
  /// with a log line and the send reports failure.
  pub fn send_frame(&self, frame: &ServerFrame) -> bool {
    self.send_outbound(Outbound::Text(frame.to_json()))
  }

  /// Queues a binary frame verbatim.
  pub fn send_binary(&self, frame: Bytes) -> bool {
    self.send_outbound(Outbound::Binary(frame))
  }

  fn send_outbound(&self, out: Outbound) -> bool {
    if self.is_closed() {
      return false;
    }
    match self.inner.outbound.try_send(out) {
      Ok(()) => true,
      Err(mpsc::error::TrySendError::Full(_)) => {
        warn!(
          connection = %self.inner.id,
          "connection.send_dropped: outbound queue full"
        );
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        debug!(connection = %self.inner.id, "send on closed connection");
        false
      }
    }
  }

  /// Asks the transport to close. Idempotent; pending sends queued
  /// after this are refused.
  pub fn close(&self) {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let _ = self.inner.outbound.try_send(Outbound::Close);
  }
}

impl std::fmt::Debug for ConnectionHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionHandle")
      .field("id", &self.inner.id)
      .field("closed", &self.is_closed())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn send_after_close_is_refused() {
    let (handle, mut rx) = ConnectionHandle::channel();
    assert!(handle.send_frame(&ServerFrame::error("x")));
    handle.close();
    assert!(!handle.send_frame(&ServerFrame::error("y")));

    assert!(matches!(rx.recv().await, Some(Outbound::Text(_))));
    assert!(matches!(rx.recv().await, Some(Outbound::Close)));
  }

  #[tokio::test]
  async fn full_queue_drops_instead_of_blocking() {
    let (tx, _rx) = mpsc::channel(1);
    let handle = ConnectionHandle::new(tx);
    assert!(handle.send_frame(&ServerFrame::error("first")));
    // queue depth 1: the second frame must drop, not block
    assert!(!handle.send_frame(&ServerFrame::error("second")));
    assert!(!handle.is_closed());
  }
}
