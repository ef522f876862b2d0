//! Core module - Common types, config, and error handling

pub mod error;
pub mod types;
pub mod config;

pub use error::{Error, Result};
pub use types::*;
pub use config::EngineConfig;
