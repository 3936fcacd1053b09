//! Error types for the Anova library

use std::time::Duration;
use thiserror::Error;

/// The main error type for Anova operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-related errors (discovery, connect, subscribe)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Writing to the device failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response payload could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The device answered with its invalid-command literal
    #[error("Device rejected command [{0}]")]
    ProtocolRejected(String),

    /// No response arrived for the pending command in time
    #[error("Timed out after {timeout:?} waiting for response to [{command}]")]
    ResponseTimeout {
        /// Command text, without terminator
        command: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// Invalid parameter provided
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Not connected to a device
    #[error("Not connected")]
    NotConnected,

    /// BLE-specific errors
    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Channel send error
    #[error("Channel error: {0}")]
    Channel(String),
}

impl Error {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a response timeout error
    pub fn timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Error::ResponseTimeout {
            command: command.into(),
            timeout,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Whether the error means no answer came back, so re-issuing may help
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ResponseTimeout { .. })
    }
}
