//! Error types for the dm40-rust-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with the given address was seen within the lookup timeout.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Operation requires a connection but the meter is not connected.
    #[error("Multimeter not connected")]
    NotConnected,

    /// A single connection attempt failed.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The write or notify characteristic was absent after service discovery.
    #[error("Required characteristics missing: {missing}")]
    MissingCharacteristics {
        /// The UUIDs that were not found.
        missing: String,
    },

    /// Every connection attempt failed.
    #[error("Connection failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<Error>,
    },

    /// A request was issued while another one was still waiting for its response.
    #[error("Another request is already waiting for a response")]
    RequestInFlight,

    /// The poll loop hit an unexpected fault and stopped.
    #[error("Poller faulted: {reason}")]
    PollerFaulted {
        /// Description of the fault.
        reason: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means the link is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
