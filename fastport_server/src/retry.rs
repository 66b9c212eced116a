//! Message cache and retry engine: at-least-once delivery.
//!
//! Every cached message owns one slot holding its timer handle and a
//! per-message mutex. The loader, scheduler, firing callback and
//! canceler all serialize on that mutex, so a timer can never fire
//! after its message was removed and there is never more than one live
//! timer per message id. Terminal events (ack, retry ceiling, expiry,
//! session drop) delete the message and release the slot.

use chrono::Utc;
use dashmap::DashMap;
use fastport_core::{CachedMessage, CoreError, ServerFrame, StorageAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandle;
use crate::subscribers::SubscriberIndex;

struct MessageSlot {
  session: String,
  state: tokio::sync::Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
  timer: Option<JoinHandle<()>>,
  /// Publisher connection, kept to route `ack_received`. Not persisted;
  /// absent for messages re-armed by recovery.
  publisher: Option<ConnectionHandle>,
}

impl SlotState {
  fn cancel_timer(&mut self) {
    if let Some(timer) = self.timer.take() {
      timer.abort();
    }
  }
}

#[derive(Clone)]
pub struct RetryEngine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  storage: Arc<dyn StorageAdapter>,
  index: SubscriberIndex,
  slots: DashMap<String, Arc<MessageSlot>>,
}

impl RetryEngine {
  pub fn new(storage: Arc<dyn StorageAdapter>, index: SubscriberIndex) -> Self {
    Self {
      inner: Arc::new(EngineInner {
        storage,
        index,
        slots: DashMap::new(),
      }),
    }
  }

  fn slot(&self, message_id: &str) -> Option<Arc<MessageSlot>> {
    self.inner.slots.get(message_id).map(|e| e.value().clone())
  }

  fn slot_for(&self, message_id: &str, session: &str) -> Arc<MessageSlot> {
    self
      .inner
      .slots
      .entry(message_id.to_string())
      .or_insert_with(|| {
        Arc::new(MessageSlot {
          session: session.to_string(),
          state: tokio::sync::Mutex::new(SlotState::default()),
        })
      })
      .clone()
  }

  /// Persists a fresh publish and arms its first retry timer. A
  /// duplicate `message_id` is an upsert: the previous timer is
  /// replaced, never duplicated.
  pub async fn track(
    &self,
    message: &CachedMessage,
    publisher: Option<ConnectionHandle>,
  ) -> Result<(), CoreError> {
    let slot = self.slot_for(&message.message_id, &message.session_name);
    let mut state = slot.state.lock().await;
    state.cancel_timer();
    state.publisher = publisher;
    if let Err(e) = self.inner.storage.save_message(message).await {
      // best-effort durability: drop the slot, delivery already happened
      state.publisher = None;
      drop(state);
      self.inner.slots.remove(&message.message_id);
      return Err(e);
    }
    self
      .evaluate_and_arm(&message.message_id, &mut state)
      .await
  }

  /// Re-reads the message and either arms a timer or, when the message
  /// is terminal (absent, expired, retries exhausted), removes it.
  pub async fn schedule_retry(&self, message_id: &str) -> Result<(), CoreError> {
    let slot = match self.slot(message_id) {
      Some(slot) => slot,
      None => {
        // No slot yet (e.g. scheduled directly after a restart): learn
        // the session from storage before creating one.
        match self.inner.storage.get_message(message_id).await? {
          Some(m) => self.slot_for(message_id, &m.session_name),
          None => return Ok(()),
        }
      }
    };
    let mut state = slot.state.lock().await;
    self.evaluate_and_arm(message_id, &mut state).await
  }

  async fn evaluate_and_arm(
    &self,
    message_id: &str,
    state: &mut SlotState,
  ) -> Result<(), CoreError> {
    let message = match self.inner.storage.get_message(message_id).await? {
      Some(m) => m,
      None => {
        state.cancel_timer();
        self.inner.slots.remove(message_id);
        return Ok(());
      }
    };

    if message.is_expired(Utc::now()) || message.retries_exhausted() {
      let reason = if message.retries_exhausted() {
        "retry ceiling"
      } else {
        "expired"
      };
      self.remove_terminal(message_id, state, reason).await?;
      return Ok(());
    }

    self.arm(message_id, state, Duration::from_millis(message.retry_interval_ms()));
    Ok(())
  }

  fn arm(&self, message_id: &str, state: &mut SlotState, delay: Duration) {
    state.cancel_timer();
    let engine = self.clone();
    let id = message_id.to_string();
    state.timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Err(e) = engine.on_fire(&id).await {
        error!(message_id = %id, "retry tick failed: {}", e);
      }
    }));
  }

  async fn remove_terminal(
    &self,
    message_id: &str,
    state: &mut SlotState,
    reason: &str,
  ) -> Result<(), CoreError> {
    state.cancel_timer();
    state.publisher = None;
    self.inner.storage.remove_message(message_id).await?;
    self.inner.slots.remove(message_id);
    info!(message_id, reason, "message.dropped");
    Ok(())
  }

  /// Retry timer callback. Reloads the message defensively: an ack or a
  /// session drop may have raced the timer.
  async fn on_fire(&self, message_id: &str) -> Result<(), CoreError> {
    let Some(slot) = self.slot(message_id) else {
      return Ok(());
    };
    let mut state = slot.state.lock().await;
    state.timer = None;

    let Some(mut message) = self.inner.storage.get_message(message_id).await? else {
      self.inner.slots.remove(message_id);
      return Ok(());
    };

    // Session gone or suspended: suppressed messages are dropped, not
    // resurrected on resume.
    let session = self.inner.storage.get_session(&message.session_name).await?;
    let alive = matches!(&session, Some(s) if !s.suspended);
    if !alive {
      self
        .remove_terminal(message_id, &mut state, "session gone or suspended")
        .await?;
      return Ok(());
    }

    if message.is_expired(Utc::now()) {
      self.remove_terminal(message_id, &mut state, "expired").await?;
      return Ok(());
    }

    message.retry_count += 1;
    self.inner.storage.save_message(&message).await?;

    let publisher_id = state.publisher.as_ref().map(|p| p.id());
    let subscribers: Vec<ConnectionHandle> = self
      .inner
      .index
      .snapshot(&message.session_name, &message.topic)
      .into_iter()
      .filter(|c| Some(c.id()) != publisher_id && !c.is_closed())
      .collect();

    if subscribers.is_empty() {
      self
        .remove_terminal(message_id, &mut state, "no live subscribers")
        .await?;
      return Ok(());
    }

    let frame = ServerFrame::Message {
      topic: message.topic.clone(),
      data: message.data.clone(),
      hash: message.hash.clone(),
      timestamp: message.timestamp,
      message_id: message.message_id.clone(),
    };
    let mut delivered = 0usize;
    for subscriber in &subscribers {
      if subscriber.send_frame(&frame) {
        delivered += 1;
      }
    }
    info!(
      message_id,
      session = %message.session_name,
      retry_count = message.retry_count,
      delivered,
      "message.retried"
    );

    self.evaluate_and_arm(message_id, &mut state).await
  }

  /// Acknowledges a message: cancels its timer and deletes it. Both are
  /// idempotent; a duplicate or foreign ack is silently ignored.
  /// Returns the publisher connection when the ack was the first.
  pub async fn ack(
    &self,
    session: &str,
    topic: &str,
    message_id: &str,
  ) -> Result<Option<ConnectionHandle>, CoreError> {
    let slot = self.slot(message_id);
    let mut state = match &slot {
      Some(slot) => Some(slot.state.lock().await),
      None => None,
    };

    let owned = matches!(
      self.inner.storage.get_message(message_id).await?,
      Some(m) if m.session_name == session && m.topic == topic
    );
    if !owned {
      debug!(message_id, session, "ack ignored");
      return Ok(None);
    }

    self.inner.storage.remove_message(message_id).await?;
    let publisher = state.as_mut().and_then(|state| {
      state.cancel_timer();
      state.publisher.take()
    });
    drop(state);
    self.inner.slots.remove(message_id);
    info!(message_id, session, "message.acked");
    Ok(publisher)
  }

  /// Cancels every retry timer belonging to a session. Storage rows go
  /// away with `delete_session`; this quiesces the in-memory side.
  pub async fn purge_session(&self, session: &str) {
    let ids: Vec<String> = self
      .inner
      .slots
      .iter()
      .filter(|e| e.value().session == session)
      .map(|e| e.key().clone())
      .collect();
    for id in ids {
      if let Some(slot) = self.slot(&id) {
        let mut state = slot.state.lock().await;
        state.cancel_timer();
        state.publisher = None;
        drop(state);
        self.inner.slots.remove(&id);
      }
    }
    debug!(session, "retry timers purged");
  }

  /// Re-arms timers for messages that survived a restart, biasing the
  /// first deadline to `published_at + retry_interval × (retry_count+1)`
  /// clipped to now.
  pub async fn recover(&self) -> Result<usize, CoreError> {
    let mut recovered = 0usize;
    let now = Utc::now();
    for session in self.inner.storage.list_sessions().await? {
      let pending = self
        .inner
        .storage
        .list_pending_messages(&session.session_name)
        .await?;
      for message in pending {
        let slot = self.slot_for(&message.message_id, &message.session_name);
        let mut state = slot.state.lock().await;
        let deadline = message.published_at
          + chrono::Duration::milliseconds(
            message.retry_interval.saturating_mul(i64::from(message.retry_count) + 1),
          );
        let delay = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        self.arm(&message.message_id, &mut state, delay);
        recovered += 1;
      }
    }
    if recovered > 0 {
      warn!(recovered, "pending messages re-armed after restart");
    }
    Ok(recovered)
  }

  /// True while a cache entry (and possibly a timer) exists. Test seam.
  pub fn is_tracked(&self, message_id: &str) -> bool {
    self.inner.slots.contains_key(message_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;
  use fastport_core::CreateSessionOpts;
  use tokio::sync::mpsc;
  use tokio::time::{advance, Duration};

  use crate::connection::Outbound;

  async fn settle() {
    for _ in 0..20 {
      tokio::task::yield_now().await;
    }
  }

  fn drain(rx: &mut mpsc::Receiver<Outbound>) -> usize {
    let mut n = 0;
    while rx.try_recv().is_ok() {
      n += 1;
    }
    n
  }

  async fn engine_with_session(
    retry_interval: i64,
    max_retry_limit: i32,
  ) -> (RetryEngine, Arc<MemoryStorage>, SubscriberIndex, fastport_core::Session) {
    let storage = Arc::new(MemoryStorage::new());
    let index = SubscriberIndex::new();
    let engine = RetryEngine::new(storage.clone(), index.clone());
    let session = fastport_core::Session::new(
      "s",
      "pw",
      "secret",
      CreateSessionOpts {
        retry_interval: Some(retry_interval),
        max_retry_limit: Some(max_retry_limit),
        ..Default::default()
      },
    );
    storage.create_session(&session).await.unwrap();
    (engine, storage, index, session)
  }

  #[tokio::test(start_paused = true)]
  async fn ack_cancels_timer_and_removes_message() {
    let (engine, storage, index, session) = engine_with_session(100, 3).await;
    let (sub, mut rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    let m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    engine.track(&m, None).await.unwrap();

    let publisher = engine.ack("s", "t", "m1").await.unwrap();
    assert!(publisher.is_none()); // tracked without a publisher handle
    assert!(storage.get_message("m1").await.unwrap().is_none());
    assert!(!engine.is_tracked("m1"));

    // the armed timer must never deliver
    advance(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(drain(&mut rx), 0);

    // duplicate ack is silently ignored
    assert!(engine.ack("s", "t", "m1").await.unwrap().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn duplicate_message_id_keeps_a_single_timer() {
    let (engine, _storage, index, session) = engine_with_session(100, 5).await;
    let (sub, mut rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    let m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    engine.track(&m, None).await.unwrap();
    engine.track(&m, None).await.unwrap(); // upsert replaces the timer

    advance(Duration::from_millis(100)).await;
    settle().await;
    // exactly one redelivery, not two
    assert_eq!(drain(&mut rx), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn retry_stops_when_no_subscriber_remains() {
    let (engine, storage, index, session) = engine_with_session(100, 5).await;
    let (sub, _rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    let m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    engine.track(&m, None).await.unwrap();

    index.unsubscribe("s", "t", sub.id());
    advance(Duration::from_millis(100)).await;
    settle().await;

    assert!(storage.get_message("m1").await.unwrap().is_none());
    assert!(!engine.is_tracked("m1"));
  }

  #[tokio::test(start_paused = true)]
  async fn purge_session_cancels_timers() {
    let (engine, storage, index, session) = engine_with_session(100, 5).await;
    let (sub, mut rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    let m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    engine.track(&m, None).await.unwrap();

    engine.purge_session("s").await;
    assert!(!engine.is_tracked("m1"));

    advance(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(drain(&mut rx), 0);
    // storage row removal is delete_session's job, not purge's
    assert!(storage.get_message("m1").await.unwrap().is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn schedule_retry_is_noop_for_absent_message() {
    let (engine, _storage, _index, _session) = engine_with_session(100, 3).await;
    engine.schedule_retry("ghost").await.unwrap();
    assert!(!engine.is_tracked("ghost"));
  }

  #[tokio::test(start_paused = true)]
  async fn schedule_retry_arms_a_saved_message() {
    let (engine, storage, index, session) = engine_with_session(100, 3).await;
    let (sub, mut rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    let m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    storage.save_message(&m).await.unwrap();
    engine.schedule_retry("m1").await.unwrap();
    assert!(engine.is_tracked("m1"));

    advance(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(drain(&mut rx), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn recovery_rearms_pending_messages() {
    let (engine, storage, index, session) = engine_with_session(100, 5).await;
    let mut m = CachedMessage::from_publish(&session, "t", "x".into(), "h", 1, "m1");
    m.retry_count = 2;
    storage.save_message(&m).await.unwrap();

    // fresh engine, as after a restart
    let recovered = engine.recover().await.unwrap();
    assert_eq!(recovered, 1);
    assert!(engine.is_tracked("m1"));

    let (sub, mut rx) = ConnectionHandle::channel();
    index.subscribe("s", "t", &sub);

    advance(Duration::from_millis(400)).await;
    settle().await;
    assert!(drain(&mut rx) >= 1);
    let reloaded = storage.get_message("m1").await.unwrap().unwrap();
    assert!(reloaded.retry_count > 2);
  }
}
