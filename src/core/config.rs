//! Configuration - Type-safe, validated config

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command channel unix socket path
    pub cmd_socket: PathBuf,

    /// Event channel unix socket path
    pub evt_socket: PathBuf,

    /// Default trading symbol
    pub symbol: String,

    /// Default timeframe
    pub timeframe: String,

    /// Heartbeat + synthetic tick interval
    pub tick_interval_ms: u64,

    /// Full status-update broadcast interval
    pub status_interval_ms: u64,

    /// Order timeout sweep interval
    pub sweep_interval_ms: u64,

    /// Max retained orders (oldest evicted beyond this)
    pub max_orders: usize,

    /// Default candle count for SNAPSHOT.GET
    pub snapshot_limit: usize,

    /// Max inbound frame size in bytes
    pub max_frame_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cmd_socket: PathBuf::from("/tmp/quantd_cmd.sock"),
            evt_socket: PathBuf::from("/tmp/quantd_evt.sock"),
            symbol: "BTC-KRW".to_string(),
            timeframe: "1m".to_string(),
            tick_interval_ms: 1_000,
            status_interval_ms: 10_000,
            sweep_interval_ms: 500,
            max_orders: 5_000,
            snapshot_limit: 120,
            max_frame_len: 4 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn load(path: &PathBuf) -> crate::core::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::core::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::core::Error::Config(format!("Failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_orders > 0);
        assert!(cfg.tick_interval_ms >= 100);
        assert_ne!(cfg.cmd_socket, cfg.evt_socket);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: EngineConfig = toml::from_str("symbol = \"ETH-KRW\"").unwrap();
        assert_eq!(cfg.symbol, "ETH-KRW");
        assert_eq!(cfg.max_orders, EngineConfig::default().max_orders);
    }
}
