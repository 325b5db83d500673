//! btleplug-backed implementation of [`Connector`] and [`Link`].
//!
//! Uses the first Bluetooth adapter reported by the platform manager.

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::link::{Connector, DeviceAddress, Link, NotificationStream};
use crate::error::{Error, Result};

/// How often the adapter's peripheral list is checked during a lookup.
const LOOKUP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Locates multimeters through a btleplug adapter.
pub struct BtleplugConnector {
    /// The BLE adapter used for lookups.
    adapter: Adapter,
}

impl BtleplugConnector {
    /// Create a connector on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a connector with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Look through peripherals the adapter already knows about.
    async fn find_known(&self, address: &DeviceAddress) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
            let id = peripheral.id().to_string();
            let mac = peripheral.address().to_string();
            trace!("Known peripheral: id={} address={}", id, mac);

            if address.matches(&id) || address.matches(&mac) {
                return Ok(Some(peripheral));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Connector for BtleplugConnector {
    async fn locate(&self, address: &DeviceAddress, timeout: Duration) -> Result<Arc<dyn Link>> {
        if let Some(peripheral) = self.find_known(address).await? {
            debug!("Device {} already known to adapter", address);
            return Ok(Arc::new(BtleplugLink::new(peripheral)));
        }

        debug!("Scanning up to {:?} for device {}", timeout, address);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let found = loop {
            if let Some(peripheral) = self.find_known(address).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(LOOKUP_POLL_INTERVAL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Some(peripheral) => {
                info!("Found device: {}", address);
                Ok(Arc::new(BtleplugLink::new(peripheral)))
            }
            None => Err(Error::DeviceNotFound {
                address: address.to_string(),
            }),
        }
    }
}

/// A located peripheral.
pub struct BtleplugLink {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BtleplugLink {
    /// Wrap a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::MissingCharacteristics {
                missing: uuid.to_string(),
            })
    }

    fn cache_characteristics(&self) -> Vec<Uuid> {
        let mut chars = self.characteristics.write();
        chars.clear();

        for service in self.peripheral.services() {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        chars.keys().copied().collect()
    }
}

#[async_trait]
impl Link for BtleplugLink {
    async fn connect(&self) -> Result<()> {
        if !self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.connect().await?;
        } else {
            info!("Peripheral already connected at BLE level");
        }

        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn characteristics(&self) -> Result<Vec<Uuid>> {
        Ok(self.cache_characteristics())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let c = self.characteristic(&characteristic)?;
        debug!("Subscribing to {}, properties: {:?}", characteristic, c.properties);
        self.peripheral.subscribe(&c).await?;
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let c = self.characteristic(&characteristic)?;
        self.peripheral.unsubscribe(&c).await?;
        debug!("Unsubscribed from notifications from {}", characteristic);
        Ok(())
    }

    async fn notifications(&self, characteristic: Uuid) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;

        Ok(stream
            .filter_map(move |notification| async move {
                (notification.uuid == characteristic).then_some(notification.value)
            })
            .boxed())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let c = self.characteristic(&characteristic)?;

        let write_type = if c.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral.write(&c, data, write_type).await?;
        trace!("Wrote {} bytes to characteristic {}", data.len(), characteristic);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        self.characteristics.write().clear();
        Ok(())
    }
}
