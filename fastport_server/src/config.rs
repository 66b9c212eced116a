use anyhow::Result;
use fastport_core::protocol::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub storage: StorageConfig,
  pub cleanup: CleanupConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  /// Frame cap for both text and binary frames; oversize frames close
  /// the connection at the transport.
  pub max_payload_size: usize,
  /// Accepted for the admin adapter; the core ignores it.
  pub api_rate_limit: Option<u32>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      port: 9100,
      max_payload_size: DEFAULT_MAX_PAYLOAD,
      api_rate_limit: None,
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
  Memory,
  Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
  pub db_type: DbType,
  pub db_url: Option<String>,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      db_type: DbType::Memory,
      db_url: None,
    }
  }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CleanupConfig {
  /// How often the expiry sweep runs, in seconds.
  pub interval_s: u64,
}

impl Default for CleanupConfig {
  fn default() -> Self {
    Self { interval_s: 3600 }
  }
}

impl AppConfig {
  /// Reads ./fastport.yml, /etc/config/fastport.yml, or the file named
  /// by FASTPORT_CONFIG; falls back to defaults when none exists. Env
  /// overrides (PORT, MAX_PAYLOAD_SIZE, DB_TYPE, DATABASE_URL,
  /// CLEANUP_INTERVAL_s, API_RATE_LIMIT) are applied last; unrecognized
  /// env keys are ignored.
  pub fn load() -> Result<Self> {
    let mut config: AppConfig = match (
      File::open("fastport.yml"),
      File::open("/etc/config/fastport.yml"),
      env::var("FASTPORT_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader)?,
      (_, Ok(reader), _) => serde_yaml::from_reader(reader)?,
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?)?,
      _ => AppConfig::default(),
    };

    config.apply_env_overrides();
    Ok(config)
  }

  fn apply_env_overrides(&mut self) {
    if let Ok(port) = env::var("PORT") {
      if let Ok(port) = port.parse() {
        self.server.port = port;
      }
    }
    if let Ok(size) = env::var("MAX_PAYLOAD_SIZE") {
      if let Ok(size) = size.parse() {
        self.server.max_payload_size = size;
      }
    }
    if let Ok(limit) = env::var("API_RATE_LIMIT") {
      self.server.api_rate_limit = limit.parse().ok();
    }
    if let Ok(db_type) = env::var("DB_TYPE") {
      match db_type.to_lowercase().as_str() {
        "memory" => self.storage.db_type = DbType::Memory,
        "postgres" | "postgresql" => self.storage.db_type = DbType::Postgres,
        other => tracing::warn!("unrecognized DB_TYPE '{}', keeping configured value", other),
      }
    }
    if let Ok(url) = env::var("DATABASE_URL") {
      self.storage.db_url = Some(url);
    }
    if let Ok(interval) = env::var("CLEANUP_INTERVAL_s").or_else(|_| env::var("CLEANUP_INTERVAL_S")) {
      if let Ok(interval) = interval.parse() {
        self.cleanup.interval_s = interval;
      }
    }
  }

  /// Configuration summary safe for logs.
  pub fn get_summary(&self) -> String {
    format!(
      "fastport config: port={} max_payload={} db={:?} cleanup_interval={}s",
      self.server.port,
      self.server.max_payload_size,
      self.storage.db_type,
      self.cleanup.interval_s
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sane() {
    let config = AppConfig::default();
    assert_eq!(config.storage.db_type, DbType::Memory);
    assert_eq!(config.server.max_payload_size, DEFAULT_MAX_PAYLOAD);
    assert_eq!(config.cleanup.interval_s, 3600);
  }

  #[test]
  fn yaml_round_trip() {
    let yaml = "server:\n  port: 9200\nstorage:\n  db_type: postgres\n  db_url: postgres://localhost/fastport\ncleanup:\n  interval_s: 60\n";
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.server.port, 9200);
    assert_eq!(config.storage.db_type, DbType::Postgres);
    assert_eq!(config.cleanup.interval_s, 60);
  }
}
