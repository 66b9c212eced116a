use async_trait::async_trait;

use crate::error::CoreError;

/// Push-notification gateway port for users who are offline when a
/// publish lands. Calls are best-effort: the publish pipeline bounds
/// them with a deadline and swallows errors.
#[async_trait]
pub trait OfflineNotifier: Send + Sync {
  async fn push_offline(
    &self,
    session: &str,
    user_id: &str,
    preview: &str,
  ) -> Result<(), CoreError>;
}

/// Default notifier: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl OfflineNotifier for NoopNotifier {
  async fn push_offline(&self, _: &str, _: &str, _: &str) -> Result<(), CoreError> {
    Ok(())
  }
}
