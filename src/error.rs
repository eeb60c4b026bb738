//! # Error Types
//!
//! Custom error types for LoRa Uplink using `thiserror`.

use thiserror::Error;

use crate::link::StackStatus;

/// Main error type for LoRa Uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No modem answered on any candidate device path
    #[error("No LoRaWAN modem found (tried: {0})")]
    SerialPortNotFound(String),

    /// A LoRaWAN stack setup step was rejected before the run loop started
    #[error("{step} failed: {status}")]
    Initialization {
        /// Name of the rejected setup step
        step: &'static str,
        /// Status reported by the stack
        status: StackStatus,
    },

    /// The OTAA connect request was rejected
    #[error("Connection error, code = {}", .0.code())]
    Connect(StackStatus),

    /// Sensor read failures
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Payload encoding or decoding errors
    #[error("Payload error: {0}")]
    Payload(String),

    /// Status journal serialization errors
    #[error("Journal error: {0}")]
    Journal(#[from] serde_json::Error),
}

/// Result type alias for LoRa Uplink
pub type Result<T> = std::result::Result<T, UplinkError>;
