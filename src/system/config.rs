//! Link configuration: timings and the polled endpoint list

use crate::endpoints::TableFull;
use crate::types::{
    AttributeId, BAT_V, GPS_ALTITUDE, GPS_FIX_QUALITY, GPS_LOCATION, GPS_SATELLITES, GPS_SPEED,
};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid link configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("too many endpoints: {0}")]
    Endpoints(#[from] TableFull),
}

/// One round-robin endpoint as written in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub service: u16,
    pub attribute: u16,
    pub max_len: usize,
}

impl EndpointConfig {
    pub const fn new(attribute: AttributeId, max_len: usize) -> Self {
        Self {
            service: attribute.service,
            attribute: attribute.attribute,
            max_len,
        }
    }

    pub fn attribute(&self) -> AttributeId {
        AttributeId::new(self.service, self.attribute)
    }
}

pub const DEFAULT_ENDPOINTS: [EndpointConfig; 6] = [
    EndpointConfig::new(BAT_V, 4),
    EndpointConfig::new(GPS_LOCATION, 16),
    EndpointConfig::new(GPS_SPEED, 4),
    EndpointConfig::new(GPS_ALTITUDE, 4),
    EndpointConfig::new(GPS_FIX_QUALITY, 2),
    EndpointConfig::new(GPS_SATELLITES, 2),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// How long a read may stay unanswered before the link is re-verified
    pub response_timeout_ms: u64,
    /// Pause between a completed read and the next one
    pub inter_request_delay_ms: u64,
    /// Retry delay after a busy transport, also the first poll after connecting
    pub retry_delay_ms: u64,
    /// Delay before re-verifying the connection after a timeout or empty scan
    pub verify_delay_ms: u64,
    /// Retry delay after an unsupported or unknown issuance error
    pub backoff_ms: u64,
    /// Connection polling interval while disconnected
    pub reconnect_interval_ms: u64,
    /// Delay before the first connection check after start-up
    pub initial_check_ms: u64,
    /// Timeout handed to the transport for each request
    pub transport_timeout_ms: u64,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            inter_request_delay_ms: 200,
            retry_delay_ms: 100,
            verify_delay_ms: 100,
            backoff_ms: 1000,
            reconnect_interval_ms: 1000,
            initial_check_ms: 1000,
            transport_timeout_ms: 500,
            endpoints: DEFAULT_ENDPOINTS.to_vec(),
        }
    }
}

impl LinkConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn timing(&self) -> LinkTiming {
        LinkTiming {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            inter_request_delay: Duration::from_millis(self.inter_request_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            verify_delay: Duration::from_millis(self.verify_delay_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            initial_check: Duration::from_millis(self.initial_check_ms),
            transport_timeout: Duration::from_millis(self.transport_timeout_ms),
        }
    }
}

/// Delays used by the scheduler and connection monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub response_timeout: Duration,
    pub inter_request_delay: Duration,
    pub retry_delay: Duration,
    pub verify_delay: Duration,
    pub backoff: Duration,
    pub reconnect_interval: Duration,
    pub initial_check: Duration,
    pub transport_timeout: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        LinkConfig::default().timing()
    }
}
