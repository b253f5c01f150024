//! Bridge error types
//!
//! Only startup failures are fatal. Everything after startup (hardware
//! trouble, bad payloads, broker drops) is contained locally and surfaced
//! through logs, so this type mostly appears on the startup path.

use thiserror::Error;

/// Top-level error for bridge startup and shutdown
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::MqttError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
