pub mod memory;
pub mod postgres;

use std::sync::Arc;

use fastport_core::{CoreError, StorageAdapter};

use crate::config::{AppConfig, DbType};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Selects the storage back-end once at startup; no per-message
/// dispatch decisions after this point.
pub async fn build_storage(config: &AppConfig) -> Result<Arc<dyn StorageAdapter>, CoreError> {
  match config.storage.db_type {
    DbType::Memory => Ok(Arc::new(MemoryStorage::new())),
    DbType::Postgres => {
      let url = config
        .storage
        .db_url
        .as_deref()
        .ok_or_else(|| CoreError::Internal("DB_TYPE=postgres requires DATABASE_URL".to_string()))?;
      let storage = PgStorage::connect(url).await?;
      Ok(Arc::new(storage))
    }
  }
}
