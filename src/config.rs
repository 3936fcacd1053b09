//! Client configuration

use std::time::Duration;

use crate::protocol::*;
use crate::{Error, Result};

/// Settings for discovering, connecting to and talking with a cooker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Default wait for each command response
    pub command_timeout: Duration,
    /// How long a single BLE scan runs
    pub scan_timeout: Duration,
    /// Scan attempts before discovery fails
    pub scan_retries: u32,
    /// Devices whose address starts with this prefix are treated as cookers
    pub address_prefix: String,
    /// Attribute handle of the command characteristic
    pub command_handle: u16,
    /// Framing bytes preceding each response
    pub frame_prefix_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_retries: DEFAULT_SCAN_RETRIES,
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
            command_handle: COMMAND_HANDLE,
            frame_prefix_len: FRAME_PREFIX_LEN,
        }
    }
}

impl Config {
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_scan_retries(mut self, retries: u32) -> Self {
        self.scan_retries = retries;
        self
    }

    pub fn with_address_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.address_prefix = prefix.into();
        self
    }

    pub fn with_frame_prefix_len(mut self, len: usize) -> Self {
        self.frame_prefix_len = len;
        self
    }

    /// Check the settings before they are used
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_zero() {
            return Err(Error::invalid_param("command_timeout must be positive"));
        }
        if self.scan_timeout.is_zero() {
            return Err(Error::invalid_param("scan_timeout must be positive"));
        }
        if self.scan_retries == 0 {
            return Err(Error::invalid_param("scan_retries must be at least 1"));
        }
        Ok(())
    }

    /// Whether a device address matches the configured prefix (case-insensitive)
    pub fn matches_address(&self, address: &str) -> bool {
        let prefix = self.address_prefix.as_bytes();
        address.len() >= prefix.len()
            && address.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}
