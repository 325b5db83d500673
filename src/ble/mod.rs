//! BLE communication module.
//!
//! This module provides the transport for talking to a DM40 meter: the
//! [`Link`]/[`Connector`] seam, its btleplug implementation, and the
//! request/response [`Session`] built on top of it.

pub mod connection;
pub mod link;
pub mod platform;
pub mod session;
pub mod uuids;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionEvent, ConnectionState};
pub use link::{Connector, DeviceAddress, Link, NotificationStream};
pub use platform::{BtleplugConnector, BtleplugLink};
pub use session::{CharacteristicHandles, Session, SessionConfig};
pub use uuids::*;
