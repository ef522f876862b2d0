//! Error handling - Hierarchical errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// quantd error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Config: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("Network: {0}")]
    Network(#[from] reqwest::Error),

    /// Socket/file IO errors
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol errors (framing, oversized frames)
    #[error("Protocol: {0}")]
    Protocol(String),

    /// Serialization errors
    #[error("Serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker API errors
    #[error("Broker: {0}")]
    Broker(String),

    /// Live order placement attempted while the live gate is off
    #[error("live placement disabled (set QUANTD_ALLOW_LIVE_PLACE=1 to enable)")]
    LivePlaceDisabled,

    /// Payload validation errors (expected, rejected in the ack)
    #[error("Validation: {0}")]
    Validation(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Request timed out waiting for the engine
    #[error("Timeout: {0}")]
    Timeout(String),
}
