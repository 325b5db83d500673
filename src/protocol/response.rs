//! Response frame decoding.
//!
//! The leading part of a response varies between captured traces while the
//! trailing part is fixed-width, so everything except the mode selector is
//! addressed from the end of the frame:
//! - Byte 5:        mode/unit selector
//! - Byte len - 8:  scale-factor selector
//! - Bytes len - 3, len - 2: raw magnitude (u16 little-endian)

use bytes::Bytes;
use std::fmt;
use tracing::trace;

use crate::data::{MeasurementMode, Reading};

/// A raw response accumulated from one or more notifications.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFrame(Bytes);

impl ResponseFrame {
    /// Shortest frame that can be decoded.
    pub const MIN_SIZE: usize = 6;

    /// Offset of the mode selector from the start of the frame.
    const MODE_OFFSET: usize = 5;

    /// Offset of the scale selector from the end of the frame.
    const SCALE_OFFSET_FROM_END: usize = 8;

    /// Offset of the magnitude's low byte from the end of the frame.
    const MAGNITUDE_OFFSET_FROM_END: usize = 3;

    /// Wrap raw response bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no bytes were received.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex representation of the frame.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Consume the frame and return its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The mode selector byte, if the frame is long enough to carry one.
    pub fn mode_selector(&self) -> Option<u8> {
        if self.len() < Self::MIN_SIZE {
            return None;
        }
        self.0.get(Self::MODE_OFFSET).copied()
    }

    /// The scale selector byte. Frames shorter than eight bytes have none.
    pub fn scale_selector(&self) -> Option<u8> {
        self.len()
            .checked_sub(Self::SCALE_OFFSET_FROM_END)
            .and_then(|i| self.0.get(i).copied())
    }

    /// The raw, unscaled magnitude.
    pub fn magnitude(&self) -> Option<u16> {
        let low = self.len().checked_sub(Self::MAGNITUDE_OFFSET_FROM_END)?;
        Some(u16::from_le_bytes([self.0[low], self.0[low + 1]]))
    }

    /// Decode the frame into a reading.
    ///
    /// Decoding never fails: frames shorter than [`Self::MIN_SIZE`] produce an
    /// absent reading and unknown selectors fall back to the hex byte and
    /// `"Unknown"`.
    pub fn decode(&self) -> Reading {
        decode(self.as_bytes())
    }
}

impl From<Vec<u8>> for ResponseFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Display for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Map a scale selector byte to its decimal multiplier.
///
/// Unrecognised selectors map to `1.0`.
pub fn scale_factor(selector: u8) -> f64 {
    match selector {
        0x18 | 0x28 => 0.1,
        0x19 | 0x29 => -0.1,
        0x16 => 1.0,
        0x17 => -1.0,
        0x14 => 0.01,
        0x15 => -0.01,
        _ => 1.0,
    }
}

/// Map a mode selector byte to `(unit, mode name)`.
///
/// Unrecognised selectors map to (`"0x.."`, `"Unknown"`).
pub fn unit_and_mode(selector: u8) -> (String, String) {
    match MeasurementMode::from_selector(selector) {
        Some(mode) => (mode.unit().to_string(), mode.name().to_string()),
        None => (format!("0x{:02x}", selector), "Unknown".to_string()),
    }
}

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Decode a raw response into a reading.
///
/// # Example
///
/// ```
/// use dm40_rust_ble::protocol::decode;
///
/// // mode 0x30 (DC voltage), scale 0x18 (x0.1), magnitude 0x000A
/// let frame = [0xDF, 0x05, 0x03, 0x09, 0x00, 0x30, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00];
/// let reading = decode(&frame);
/// assert_eq!(reading.value, Some(1.0));
/// assert_eq!(reading.unit, "mV");
/// assert_eq!(reading.mode, "DC Voltage");
/// ```
pub fn decode(data: &[u8]) -> Reading {
    let frame = ResponseFrame::new(Bytes::copy_from_slice(data));

    let (Some(mode_selector), Some(magnitude)) = (frame.mode_selector(), frame.magnitude()) else {
        trace!("Response too short to decode: {} bytes", data.len());
        return Reading::absent();
    };

    let scale = frame.scale_selector().map(scale_factor).unwrap_or(1.0);
    let (unit, mode) = unit_and_mode(mode_selector);
    let value = round2(f64::from(magnitude) * scale);

    trace!(
        "Decoded {:02X?}: magnitude={} scale={} -> {} {} ({})",
        data,
        magnitude,
        scale,
        value,
        unit,
        mode
    );

    Reading {
        value: Some(value),
        unit,
        mode,
    }
}
