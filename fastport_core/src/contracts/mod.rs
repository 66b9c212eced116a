pub mod notifier;
pub mod storage;

pub use notifier::{NoopNotifier, OfflineNotifier};
pub use storage::{CleanupCounts, StorageAdapter};
