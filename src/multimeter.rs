//! Multimeter struct and methods.
//!
//! Represents a single DM40 meter: connection, mode selection, manual reads,
//! raw pass-through and background polling.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::connection::{ConnectionEvent, ConnectionState};
use crate::ble::link::{Connector, DeviceAddress};
use crate::ble::platform::BtleplugConnector;
use crate::ble::session::Session;
use crate::config::MultimeterConfig;
use crate::data::{MeasurementMode, Reading};
use crate::error::Result;
use crate::poller::{Poller, PollerState};
use crate::protocol::{decode, CommandFrame};

/// Response to a raw command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawResponse {
    /// Bytes as received.
    pub bytes: Vec<u8>,
    /// The same bytes as lowercase hex.
    pub hex: String,
}

impl RawResponse {
    fn new(bytes: Bytes) -> Self {
        Self {
            hex: hex::encode(&bytes),
            bytes: bytes.to_vec(),
        }
    }
}

/// A DM40 multimeter.
///
/// Dropping a handle stops polling and closes the link in the background
/// without waiting for it. Prefer [`with_connection`](Self::with_connection)
/// or an explicit [`disconnect`](Self::disconnect) so the link is closed
/// before the handle goes away.
///
/// # Example
///
/// ```rust,no_run
/// use dm40_rust_ble::{Multimeter, MultimeterConfig, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let meter = Multimeter::new(MultimeterConfig::new("AA:BB:CC:DD:EE:FF")).await?;
///     meter.connect().await?;
///     meter.set_dc_voltage_mode().await?;
///
///     let reading = meter.read().await?;
///     println!("{}", reading);
///
///     meter.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct Multimeter {
    config: MultimeterConfig,
    session: Arc<Session>,
    poller: Poller,
}

impl Multimeter {
    /// Create a meter handle using the first Bluetooth adapter.
    ///
    /// Does not connect.
    pub async fn new(config: MultimeterConfig) -> Result<Self> {
        let connector = BtleplugConnector::new().await?;
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a meter handle on a specific transport.
    pub fn with_connector(config: MultimeterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(Session::new(
            connector,
            config.address.clone(),
            config.session_config(),
        ));
        let poller = Poller::new(session.clone(), config.poller_config());

        Ok(Self {
            config,
            session,
            poller,
        })
    }

    /// The meter's address.
    pub fn address(&self) -> &DeviceAddress {
        &self.config.address
    }

    /// The settings this handle was created with.
    pub fn config(&self) -> &MultimeterConfig {
        &self.config
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Current state of the poll loop.
    pub fn poller_state(&self) -> PollerState {
        self.poller.state()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.session.subscribe()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect, retrying up to `max_connect_retries` times.
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to {}", self.config.address);
        self.session.connect(self.config.max_connect_retries).await
    }

    /// Stop polling if it is running, then disconnect.
    pub async fn disconnect(&self) {
        if self.poller.state().is_active() {
            self.poller.stop().await;
        } else {
            self.session.disconnect().await;
        }
    }

    /// Connect, run `f`, then disconnect.
    ///
    /// The meter is disconnected whether `f` succeeds or fails. When the
    /// connection itself could not be made, `f` is not run and the state
    /// stays [`ConnectionState::Failed`].
    ///
    /// ```rust,no_run
    /// # use dm40_rust_ble::{Multimeter, Result};
    /// # async fn run(meter: Multimeter) -> Result<()> {
    /// let reading = meter
    ///     .with_connection(|meter| Box::pin(async move { meter.read().await }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, Result<T>>,
    {
        let outcome = match self.connect().await {
            Ok(()) => f(self).await,
            Err(e) => Err(e),
        };
        self.disconnect().await;
        outcome
    }

    // ========================================================================
    // Mode selection
    // ========================================================================

    /// Switch the measurement mode.
    ///
    /// Returns `true` if the meter answered within the request timeout. The
    /// answer is not inspected further. While polling runs this fails with
    /// [`Error::RequestInFlight`](crate::Error::RequestInFlight) if a poll is
    /// waiting at that moment; the poller itself carries on either way.
    pub async fn set_mode(&self, mode: MeasurementMode) -> Result<bool> {
        let frame = CommandFrame::set_mode(mode);
        debug!("Setting mode {} ({})", mode, frame);

        let answered = self
            .session
            .request(&frame, self.config.request_timeout)
            .await?
            .is_some();

        if !answered {
            warn!("No response to mode change {}", mode);
        }
        Ok(answered)
    }

    /// Switch to DC voltage.
    pub async fn set_dc_voltage_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::DcVoltage).await
    }

    /// Switch to AC voltage.
    pub async fn set_ac_voltage_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::AcVoltage).await
    }

    /// Switch to DC current.
    pub async fn set_dc_current_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::DcCurrent).await
    }

    /// Switch to AC current.
    pub async fn set_ac_current_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::AcCurrent).await
    }

    /// Switch to resistance.
    pub async fn set_resistance_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Resistance).await
    }

    /// Switch to capacitance.
    pub async fn set_capacitance_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Capacitance).await
    }

    /// Switch to frequency.
    pub async fn set_frequency_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Frequency).await
    }

    /// Switch to temperature.
    pub async fn set_temperature_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Temperature).await
    }

    /// Switch to diode test.
    pub async fn set_diode_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Diode).await
    }

    /// Switch to continuity.
    pub async fn set_continuity_mode(&self) -> Result<bool> {
        self.set_mode(MeasurementMode::Continuity).await
    }

    /// Same as [`set_dc_voltage_mode`](Self::set_dc_voltage_mode).
    pub async fn set_voltage_mode(&self) -> Result<bool> {
        self.set_dc_voltage_mode().await
    }

    /// Same as [`set_dc_current_mode`](Self::set_dc_current_mode).
    pub async fn set_current_mode(&self) -> Result<bool> {
        self.set_dc_current_mode().await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Take one reading.
    ///
    /// Returns an absent reading if the meter does not answer in time or the
    /// answer cannot be decoded. While polling runs this usually fails with
    /// [`Error::RequestInFlight`](crate::Error::RequestInFlight).
    pub async fn read(&self) -> Result<Reading> {
        let response = self
            .session
            .request(&CommandFrame::read_data(), self.config.request_timeout)
            .await?;

        Ok(match response {
            Some(response) => decode(response.as_bytes()),
            None => Reading::absent(),
        })
    }

    /// Send arbitrary bytes and return whatever comes back.
    ///
    /// Returns `None` on timeout.
    pub async fn send_raw(&self, data: impl Into<Bytes>) -> Result<Option<RawResponse>> {
        let frame = CommandFrame::raw(data);
        debug!("Sending raw command: {}", frame);

        let response = self
            .session
            .request(&frame, self.config.request_timeout)
            .await?;

        Ok(response.map(|response| RawResponse::new(response.into_bytes())))
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Start polling, connecting first if needed.
    pub async fn start_polling(&self) -> Result<()> {
        if !self.session.is_connected() {
            self.connect().await?;
        }
        self.poller.start()
    }

    /// Stop polling and disconnect. Returns the final poller state.
    pub async fn stop_polling(&self) -> PollerState {
        self.poller.stop().await
    }

    /// The last reading with a value. Never blocks.
    pub fn current_reading(&self) -> Option<Reading> {
        self.poller.latest().map(|latest| latest.reading)
    }

    /// When the last reading with a value arrived.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.poller.latest().map(|latest| latest.received_at)
    }

    /// Register a callback invoked with `(value, unit, mode)` on every poll
    /// that produced a value. Replaces any earlier callback.
    ///
    /// A panicking callback stops the poller in
    /// [`PollerState::Errored`].
    pub fn set_data_callback<F>(&self, callback: F)
    where
        F: Fn(f64, &str, &str) + Send + Sync + 'static,
    {
        self.poller.set_callback(Arc::new(callback));
    }

    /// Remove the data callback.
    pub fn clear_data_callback(&self) {
        self.poller.clear_callback();
    }

    /// Subscribe to readings produced by the poller.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<Reading> {
        self.poller.subscribe()
    }
}

impl std::fmt::Debug for Multimeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multimeter")
            .field("address", &self.config.address)
            .field("connection_state", &self.connection_state())
            .field("poller_state", &self.poller_state())
            .finish()
    }
}
