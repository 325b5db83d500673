//! Configuration for a [`Multimeter`](crate::Multimeter).

use std::time::Duration;

use crate::ble::link::DeviceAddress;
use crate::ble::session::{
    SessionConfig, DEFAULT_LOOKUP_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY,
};
use crate::error::{Error, Result};
use crate::poller::PollerConfig;

/// Default number of connection attempts.
pub const DEFAULT_MAX_CONNECT_RETRIES: u32 = 3;

/// Default pause between poll iterations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Settings for one meter.
///
/// # Example
///
/// ```
/// use dm40_rust_ble::MultimeterConfig;
/// use std::time::Duration;
///
/// let config = MultimeterConfig::new("AA:BB:CC:DD:EE:FF")
///     .with_poll_interval(Duration::from_millis(200))
///     .with_max_connect_retries(5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimeterConfig {
    /// Address of the meter.
    pub address: DeviceAddress,
    /// Connection attempts before giving up.
    pub max_connect_retries: u32,
    /// Pause between poll iterations.
    pub poll_interval: Duration,
    /// Time to wait for each response.
    pub request_timeout: Duration,
    /// Delay between connection attempts.
    pub retry_delay: Duration,
    /// How long each connection attempt looks for the device.
    pub lookup_timeout: Duration,
}

impl MultimeterConfig {
    /// Defaults for the meter at `address`.
    pub fn new(address: impl Into<DeviceAddress>) -> Self {
        Self {
            address: address.into(),
            max_connect_retries: DEFAULT_MAX_CONNECT_RETRIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Set the number of connection attempts.
    pub fn with_max_connect_retries(mut self, retries: u32) -> Self {
        self.max_connect_retries = retries;
        self
    }

    /// Set the pause between poll iterations.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the response timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the delay between connection attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set how long each attempt looks for the device.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(invalid("address", &self.address));
        }
        if self.max_connect_retries == 0 {
            return Err(invalid("max_connect_retries", &self.max_connect_retries));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", &format!("{:?}", self.request_timeout)));
        }
        if self.lookup_timeout.is_zero() {
            return Err(invalid("lookup_timeout", &format!("{:?}", self.lookup_timeout)));
        }
        Ok(())
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retry_delay: self.retry_delay,
            lookup_timeout: self.lookup_timeout,
        }
    }

    pub(crate) fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            request_timeout: self.request_timeout,
        }
    }
}

fn invalid(name: &str, value: &dyn std::fmt::Display) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}
