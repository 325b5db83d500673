//! Transport abstraction over a BLE peripheral.
//!
//! [`Connector`] turns a [`DeviceAddress`] into a [`Link`]; a [`Link`]
//! exposes the handful of GATT operations the session needs. The btleplug
//! implementation lives in [`crate::ble::platform`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Platform identifier of a peripheral.
///
/// A MAC address on Linux and Windows, a CoreBluetooth peripheral UUID on
/// macOS. Comparison against discovered peripherals ignores ASCII case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Create an address from its textual form.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_string())
    }

    /// The address as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a platform identifier refers to this address.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.eq_ignore_ascii_case(candidate.trim())
    }

    /// Whether the address is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Stream of raw notification payloads from one characteristic, in arrival order.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// GATT operations on a located peripheral.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send + Sync {
    /// Establish the BLE connection and discover services.
    async fn connect(&self) -> Result<()>;

    /// UUIDs of every characteristic found during service discovery.
    async fn characteristics(&self) -> Result<Vec<Uuid>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Notifications delivered by `characteristic`.
    ///
    /// The stream ends when the peripheral disconnects.
    async fn notifications(&self, characteristic: Uuid) -> Result<NotificationStream>;

    /// Write a command to a characteristic.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Whether the BLE connection is currently up.
    async fn is_connected(&self) -> bool;

    /// Close the BLE connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Locates peripherals by address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Find the peripheral at `address`, waiting at most `timeout`.
    ///
    /// Returns [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) when
    /// nothing with that address is seen in time.
    async fn locate(&self, address: &DeviceAddress, timeout: Duration) -> Result<Arc<dyn Link>>;
}
