//! Periodic expiry sweep: reaps expired messages and expired sessions
//! through the storage port, then quiesces whatever the sweep deleted.

use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::state::AppState;

pub fn spawn(state: AppState) {
  let interval = Duration::from_secs(state.config.cleanup.interval_s.max(1));
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    // the immediate first tick would race startup recovery
    ticker.tick().await;
    loop {
      ticker.tick().await;
      run_once(&state).await;
    }
  });
}

pub async fn run_once(state: &AppState) {
  match state.storage.cleanup_expired(Utc::now()).await {
    Ok(counts) => {
      for session in &counts.sessions {
        state.registry.quiesce(session).await;
      }
      if counts.messages > 0 || !counts.sessions.is_empty() {
        info!(
          messages = counts.messages,
          sessions = counts.sessions.len(),
          "sweeper.cleaned"
        );
      }
    }
    Err(e) => error!("expiry sweep failed: {}", e),
  }
}
