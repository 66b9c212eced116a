//! In-memory subscriber index: per session, who listens on which topic
//! and which user rides which connection.
//!
//! Mutations are serialized per session behind a mutex; readers get a
//! cloned snapshot so fan-out never holds the lock across sends.
//! Delivery order ties break on subscription insertion order.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::connection::ConnectionHandle;

#[derive(Default)]
struct SessionEntry {
  /// topic → subscribers in insertion order.
  topics: HashMap<String, Vec<ConnectionHandle>>,
  /// userId → the connection currently carrying that user.
  users: HashMap<String, ConnectionHandle>,
  /// Every authenticated connection bound to the session.
  connections: Vec<ConnectionHandle>,
}

#[derive(Clone, Default)]
pub struct SubscriberIndex {
  sessions: Arc<DashMap<String, Arc<Mutex<SessionEntry>>>>,
}

impl SubscriberIndex {
  pub fn new() -> Self {
    Self::default()
  }

  fn entry(&self, session: &str) -> Arc<Mutex<SessionEntry>> {
    self
      .sessions
      .entry(session.to_string())
      .or_default()
      .clone()
  }

  /// Binds an authenticated connection to its session.
  pub fn register_connection(&self, session: &str, conn: &ConnectionHandle) {
    let entry = self.entry(session);
    let mut entry = entry.lock().expect("subscriber index poisoned");
    if !entry.connections.iter().any(|c| c.id() == conn.id()) {
      entry.connections.push(conn.clone());
    }
  }

  pub fn subscribe(&self, session: &str, topic: &str, conn: &ConnectionHandle) {
    let entry = self.entry(session);
    let mut entry = entry.lock().expect("subscriber index poisoned");
    let subs = entry.topics.entry(topic.to_string()).or_default();
    if !subs.iter().any(|c| c.id() == conn.id()) {
      subs.push(conn.clone());
    }
  }

  pub fn unsubscribe(&self, session: &str, topic: &str, conn_id: Uuid) {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return;
    };
    let mut entry = entry.lock().expect("subscriber index poisoned");
    if let Some(subs) = entry.topics.get_mut(topic) {
      subs.retain(|c| c.id() != conn_id);
      if subs.is_empty() {
        entry.topics.remove(topic);
      }
    }
  }

  pub fn register_user(&self, session: &str, user_id: &str, conn: &ConnectionHandle) {
    let entry = self.entry(session);
    let mut entry = entry.lock().expect("subscriber index poisoned");
    entry.users.insert(user_id.to_string(), conn.clone());
  }

  /// Drops every trace of a connection: subscriptions, user binding,
  /// session membership. Used on connection close.
  pub fn remove_connection(&self, session: &str, conn_id: Uuid) {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return;
    };
    let mut entry = entry.lock().expect("subscriber index poisoned");
    entry.topics.retain(|_, subs| {
      subs.retain(|c| c.id() != conn_id);
      !subs.is_empty()
    });
    entry.users.retain(|_, c| c.id() != conn_id);
    entry.connections.retain(|c| c.id() != conn_id);
    debug!(session, connection = %conn_id, "connection removed from index");
  }

  /// Stable fan-out snapshot in subscription insertion order.
  pub fn snapshot(&self, session: &str, topic: &str) -> Vec<ConnectionHandle> {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return Vec::new();
    };
    let entry = entry.lock().expect("subscriber index poisoned");
    entry.topics.get(topic).cloned().unwrap_or_default()
  }

  /// All connections bound to a session; used by session drop.
  pub fn connections_of(&self, session: &str) -> Vec<ConnectionHandle> {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return Vec::new();
    };
    let entry = entry.lock().expect("subscriber index poisoned");
    entry.connections.clone()
  }

  pub fn user_online(&self, session: &str, user_id: &str) -> bool {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return false;
    };
    let entry = entry.lock().expect("subscriber index poisoned");
    entry.users.contains_key(user_id)
  }

  pub fn online_users(&self, session: &str) -> HashSet<String> {
    let Some(entry) = self.sessions.get(session).map(|e| e.clone()) else {
      return HashSet::new();
    };
    let entry = entry.lock().expect("subscriber index poisoned");
    entry.users.keys().cloned().collect()
  }

  /// Tears down the whole session entry, returning the connections that
  /// were bound so the caller can close them.
  pub fn clear_session(&self, session: &str) -> Vec<ConnectionHandle> {
    let Some((_, entry)) = self.sessions.remove(session) else {
      return Vec::new();
    };
    let mut entry = entry.lock().expect("subscriber index poisoned");
    entry.topics.clear();
    entry.users.clear();
    std::mem::take(&mut entry.connections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn conn() -> ConnectionHandle {
    ConnectionHandle::channel().0
  }

  #[test]
  fn snapshot_preserves_insertion_order() {
    let index = SubscriberIndex::new();
    let (a, b, c) = (conn(), conn(), conn());
    index.subscribe("s", "t", &a);
    index.subscribe("s", "t", &b);
    index.subscribe("s", "t", &c);
    // duplicate subscribe is a no-op
    index.subscribe("s", "t", &a);

    let snap = index.snapshot("s", "t");
    let ids: Vec<_> = snap.iter().map(|h| h.id()).collect();
    assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
  }

  #[test]
  fn sessions_are_isolated() {
    let index = SubscriberIndex::new();
    let a = conn();
    index.subscribe("s1", "shared", &a);
    assert_eq!(index.snapshot("s2", "shared").len(), 0);
  }

  #[test]
  fn remove_connection_clears_every_binding() {
    let index = SubscriberIndex::new();
    let a = conn();
    index.register_connection("s", &a);
    index.subscribe("s", "t1", &a);
    index.subscribe("s", "t2", &a);
    index.register_user("s", "u1", &a);

    index.remove_connection("s", a.id());
    assert!(index.snapshot("s", "t1").is_empty());
    assert!(index.snapshot("s", "t2").is_empty());
    assert!(!index.user_online("s", "u1"));
    assert!(index.connections_of("s").is_empty());
  }

  #[test]
  fn clear_session_returns_bound_connections() {
    let index = SubscriberIndex::new();
    let (a, b) = (conn(), conn());
    index.register_connection("s", &a);
    index.register_connection("s", &b);
    index.subscribe("s", "t", &a);

    let conns = index.clear_session("s");
    assert_eq!(conns.len(), 2);
    assert!(index.snapshot("s", "t").is_empty());
  }

  #[test]
  fn unsubscribe_only_affects_one_topic() {
    let index = SubscriberIndex::new();
    let a = conn();
    index.subscribe("s", "t1", &a);
    index.subscribe("s", "t2", &a);
    index.unsubscribe("s", "t1", a.id());
    assert!(index.snapshot("s", "t1").is_empty());
    assert_eq!(index.snapshot("s", "t2").len(), 1);
  }
}
