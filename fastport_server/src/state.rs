use std::ops::Deref;
use std::sync::Arc;

use fastport_core::{NoopNotifier, OfflineNotifier, StorageAdapter};

use crate::{
  config::AppConfig, registry::SessionRegistry, retry::RetryEngine, subscribers::SubscriberIndex,
};

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: AppConfig,
  pub storage: Arc<dyn StorageAdapter>,
  pub subscribers: SubscriberIndex,
  pub retry: RetryEngine,
  pub registry: SessionRegistry,
  pub notifier: Arc<dyn OfflineNotifier>,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub fn new(config: AppConfig, storage: Arc<dyn StorageAdapter>) -> Self {
    Self::with_notifier(config, storage, Arc::new(NoopNotifier))
  }

  pub fn with_notifier(
    config: AppConfig,
    storage: Arc<dyn StorageAdapter>,
    notifier: Arc<dyn OfflineNotifier>,
  ) -> Self {
    let subscribers = SubscriberIndex::new();
    let retry = RetryEngine::new(storage.clone(), subscribers.clone());
    let registry = SessionRegistry::new(storage.clone(), subscribers.clone(), retry.clone());

    Self {
      inner: Arc::new(AppStateInner {
        config,
        storage,
        subscribers,
        retry,
        registry,
        notifier,
      }),
    }
  }
}
