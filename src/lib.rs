//! quantd - Core Library
//! Personal algorithmic trading engine with a local IPC control plane

// Public modules
pub mod core;
pub mod protocol;
pub mod engine;
pub mod broker;
pub mod server;
pub mod client;

// Re-exports
pub use crate::core::{EngineConfig, Error, Result};
