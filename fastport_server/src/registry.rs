//! Session registry: tenant lifecycle and credential checks.
//!
//! Create and drop serialize per session name, so racing admin calls
//! cannot interleave on the same tenant.

use dashmap::DashMap;
use fastport_core::{
  crypto, CoreError, CreateSessionOpts, Session, SessionPatch, StorageAdapter,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::retry::RetryEngine;
use crate::subscribers::SubscriberIndex;

#[derive(Clone)]
pub struct SessionRegistry {
  inner: Arc<RegistryInner>,
}

struct RegistryInner {
  storage: Arc<dyn StorageAdapter>,
  index: SubscriberIndex,
  retry: RetryEngine,
  name_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
  pub fn new(
    storage: Arc<dyn StorageAdapter>,
    index: SubscriberIndex,
    retry: RetryEngine,
  ) -> Self {
    Self {
      inner: Arc::new(RegistryInner {
        storage,
        index,
        retry,
        name_locks: DashMap::new(),
      }),
    }
  }

  fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
    self
      .inner
      .name_locks
      .entry(name.to_string())
      .or_default()
      .clone()
  }

  /// Creates a tenant with a freshly generated secret key. The returned
  /// record carries the credentials for the one-time admin response.
  pub async fn create_session(
    &self,
    name: &str,
    password: &str,
    opts: CreateSessionOpts,
  ) -> Result<Session, CoreError> {
    if name.is_empty() || password.is_empty() {
      return Err(CoreError::Protocol(
        "sessionName and password are required".to_string(),
      ));
    }

    let lock = self.name_lock(name);
    let _guard = lock.lock().await;

    if self.inner.storage.get_session(name).await?.is_some() {
      return Err(CoreError::AlreadyExists(name.to_string()));
    }

    let secret_key = crypto::generate_secret_key();
    let session = Session::new(name, password, &secret_key, opts);
    self.inner.storage.create_session(&session).await?;
    info!(session = name, "session.created");
    Ok(session)
  }

  /// Flips the suspended flag. Existing connections stay open; new
  /// publishes and redeliveries are gated instead.
  pub async fn suspend_session(
    &self,
    name: &str,
    password: &str,
    secret_key: &str,
    suspend: bool,
  ) -> Result<(), CoreError> {
    self.authorize(name, password, secret_key).await?;
    self
      .inner
      .storage
      .update_session(name, &SessionPatch::suspend(suspend))
      .await?;
    info!(session = name, suspended = suspend, "session.suspended");
    Ok(())
  }

  /// Destroys a tenant: closes its connections, clears the subscriber
  /// index, cancels its retry timers, then deletes storage (which also
  /// removes cached messages). Idempotent after the first success.
  pub async fn drop_session(
    &self,
    name: &str,
    password: &str,
    secret_key: &str,
  ) -> Result<(), CoreError> {
    let lock = self.name_lock(name);
    let _guard = lock.lock().await;

    match self.inner.storage.get_session(name).await? {
      None => return Ok(()),
      Some(session) => {
        if !session.verify_password(password) || !session.verify_secret(secret_key) {
          return Err(CoreError::Auth);
        }
      }
    }

    self.quiesce(name).await;
    self.inner.storage.delete_session(name).await?;
    info!(session = name, "session.dropped");
    Ok(())
  }

  /// Tears down the live side of a session: connections, index entry,
  /// retry timers. Shared by drop and the expiry sweep.
  pub async fn quiesce(&self, name: &str) {
    self.inner.retry.purge_session(name).await;
    let connections = self.inner.index.clear_session(name);
    for conn in connections {
      // moves each connection into Closing; its actor finishes the
      // transition to Closed when the transport winds down
      conn.close();
    }
  }

  /// Client-side `init` check: unknown name and wrong password both
  /// collapse to an auth failure; a suspended tenant is surfaced as
  /// such.
  pub async fn validate_init(&self, name: &str, password: &str) -> Result<Session, CoreError> {
    let session = self
      .inner
      .storage
      .get_session(name)
      .await?
      .ok_or(CoreError::Auth)?;
    if !session.verify_password(password) {
      return Err(CoreError::Auth);
    }
    if session.suspended {
      return Err(CoreError::SessionSuspended(name.to_string()));
    }
    Ok(session)
  }

  async fn authorize(&self, name: &str, password: &str, secret_key: &str) -> Result<Session, CoreError> {
    let session = self
      .inner
      .storage
      .get_session(name)
      .await?
      .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
    if !session.verify_password(password) || !session.verify_secret(secret_key) {
      return Err(CoreError::Auth);
    }
    Ok(session)
  }

  pub async fn list_sessions(&self) -> Result<Vec<Session>, CoreError> {
    self.inner.storage.list_sessions().await
  }
}
