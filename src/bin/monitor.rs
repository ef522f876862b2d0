//! monitor - tail the engine's event socket
//!
//! Connects to the event channel and prints every event as one line of
//! JSON. Handy for watching a live engine without touching it.

use std::path::PathBuf;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use quantd::client::EventClient;
use quantd::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    let mut events = EventClient::connect(&config.evt_socket, Duration::from_secs(5)).await?;
    eprintln!("connected to {}", config.evt_socket.display());

    loop {
        // Long idle gaps are fine; heartbeats arrive every second anyway.
        let evt = events.next_event(Duration::from_secs(60)).await?;
        println!("{}", serde_json::to_string(&evt)?);
    }
}
