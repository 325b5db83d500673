// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # dm40-rust-ble
//!
//! A cross-platform Rust library for reading DM40-series digital multimeters
//! over Bluetooth Low Energy.
//!
//! The meter speaks a small request/response protocol over two GATT
//! characteristics: commands are written to one and answers arrive as
//! notifications on the other. This crate wraps that in a [`Multimeter`]
//! handle.
//!
//! ## Features
//!
//! - **Connect with retry**: Bounded attempts with a fixed delay between them
//! - **Mode selection**: DC/AC voltage, DC/AC current, resistance,
//!   capacitance, frequency, temperature, diode and continuity
//! - **Manual reads**: One-shot readings decoded to value, unit and mode
//! - **Background polling**: Periodic reads delivered to a callback or channel
//! - **Raw pass-through**: Send arbitrary frames and inspect the answer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dm40_rust_ble::{Multimeter, MultimeterConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let meter = Multimeter::new(MultimeterConfig::new("AA:BB:CC:DD:EE:FF")).await?;
//!
//!     meter.set_data_callback(|value, unit, mode| {
//!         println!("{value} {unit} ({mode})");
//!     });
//!
//!     // Connects first if needed
//!     meter.start_polling().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     // Stops the poll loop and disconnects
//!     meter.stop_polling().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. Peripherals are identified by a
//! platform UUID rather than a MAC address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod multimeter;
pub mod poller;
pub mod protocol;

// Re-exports for convenience
pub use config::MultimeterConfig;
pub use error::{Error, Result};
pub use multimeter::{Multimeter, RawResponse};
pub use poller::{DataCallback, LatestReading, PollerState};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionEvent, ConnectionState};
pub use ble::link::{Connector, DeviceAddress, Link};
pub use data::{MeasurementMode, Reading};
