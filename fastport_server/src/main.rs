use anyhow::Result;

use fastport_server::{get_router, AppConfig};
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{
  fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[tokio::main]
async fn main() -> Result<()> {
  // Initialize tracing for logging
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::INFO.into())
    .from_env_lossy();
  tracing_subscriber::registry()
    .with(Layer::new())
    .with(filter)
    .init();

  let config = match AppConfig::load() {
    Ok(config) => {
      info!("{}", config.get_summary());
      config
    }
    Err(e) => {
      eprintln!("❌ Failed to load configuration: {}", e);
      std::process::exit(1);
    }
  };

  let addr = format!("0.0.0.0:{}", config.server.port);

  // Storage init failure at boot is fatal.
  let (app, _state) = match get_router(config).await {
    Ok(built) => built,
    Err(e) => {
      eprintln!("❌ Failed to initialize broker: {}", e);
      std::process::exit(1);
    }
  };

  let listener = TcpListener::bind(&addr).await?;
  info!("🚀 fastport_server listening on: {}", addr);

  axum::serve(listener, app.into_make_service()).await?;

  Ok(())
}
