//! quantd - trading engine daemon
//!
//! Binds the command and event sockets, wires the broker from the
//! environment and runs the engine loop until killed.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use quantd::broker::{make_broker, Broker};
use quantd::server::EngineServer;
use quantd::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,quantd=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    let broker = make_broker();
    tracing::info!(broker = broker.name(), symbol = %config.symbol, "starting quantd");

    EngineServer::new(config, broker).run().await?;
    Ok(())
}
