//! Connection state tracking.
//!
//! The connect/retry logic itself lives in [`Session`](crate::ble::session::Session).

/// Connection state of a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the meter.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected, with write and notify characteristics bound.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
    /// Every connection attempt failed. The caller must call `connect` again.
    Failed,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Check if the last connection attempt gave up.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The address of the meter.
    pub identifier: String,
    /// The new connection state.
    pub state: ConnectionState,
}
