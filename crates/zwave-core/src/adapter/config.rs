//! Adapter configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};
use crate::sequence::DEFAULT_MAX_RETRIES;

/// Default capacity of the inbound dispatch queue
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1000;

/// Default time allowed for opening the port in milliseconds
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 2000;

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Time allowed for opening the port in milliseconds
    pub open_timeout_ms: u64,
    /// Wait per attempt for the ACK, response and callback in milliseconds
    pub timeout_ms: u64,
    /// Transmission attempts per request
    pub max_retries: u32,
    /// Retransmit when no ACK arrives in time
    pub retry_on_ack_timeout: bool,
    /// Retransmit when a response or callback does not arrive in time
    pub retry_on_response_timeout: bool,
    /// Retransmit as soon as a NAK or CAN answers the request
    pub retransmit_on_nak: bool,
    /// Send a Soft Reset after a sequence fails
    pub soft_reset_on_failure: bool,
    /// Capacity of the inbound dispatch queue
    pub dispatch_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_on_ack_timeout: true,
            retry_on_response_timeout: false,
            retransmit_on_nak: false,
            soft_reset_on_failure: true,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
        }
    }
}

impl AdapterConfig {
    /// Configuration for a port with every other setting at its default
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.max_retries == 0 {
            return Err(ProtocolError::Config(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if self.dispatch_capacity == 0 {
            return Err(ProtocolError::Config(
                "dispatch_capacity must be positive".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ProtocolError::Config("timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(config.retry_on_ack_timeout);
        assert!(!config.retry_on_response_timeout);
        assert!(!config.retransmit_on_nak);
        assert!(config.soft_reset_on_failure);
        assert_eq!(config.dispatch_capacity, 1000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            AdapterConfig::from_json_str(r#"{"port_name": "/dev/ttyACM0", "timeout_ms": 500}"#)
                .expect("valid config");
        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            AdapterConfig::from_json_str(r#"{"max_retries": 0}"#),
            Err(ProtocolError::Config(_))
        ));
        assert!(matches!(
            AdapterConfig::from_json_str("{"),
            Err(ProtocolError::Json(_))
        ));
    }
}
