//! Command frame construction.
//!
//! Frame layouts sent to the write characteristic:
//! - Mode select: Preamble(1) + Header(3) + Opcode flag(1) + Mode(1) + Checksum(1)
//! - Read data:   Preamble(1) + Header(3) + Opcode(1) + Trailer(1), no checksum

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::data::MeasurementMode;
use crate::protocol::checksum::xor_checksum;

/// First byte of every command frame.
pub const FRAME_PREAMBLE: u8 = 0xAF;

/// Fixed header bytes following the preamble.
const FRAME_HEADER: [u8; 2] = [0x05, 0x03];

/// Opcode selecting the measurement mode.
const OPCODE_SET_MODE: u8 = 0x06;

/// Opcode requesting the current measurement.
const OPCODE_READ_DATA: u8 = 0x09;

/// The complete data-read frame. The device does not expect a checksum here.
pub const READ_DATA_FRAME: [u8; 6] = [FRAME_PREAMBLE, 0x05, 0x03, OPCODE_READ_DATA, 0x00, 0x40];

/// Kind of command carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Switch the meter to a measurement mode.
    SetMode(MeasurementMode),
    /// Read the current measurement.
    ReadData,
    /// Caller-supplied bytes sent verbatim.
    Raw,
}

/// An encoded command, ready to be written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    kind: CommandKind,
    bytes: Bytes,
}

impl CommandFrame {
    /// Size of a mode-select frame in bytes.
    pub const SET_MODE_SIZE: usize = 7;

    /// Size of the data-read frame in bytes.
    pub const READ_DATA_SIZE: usize = READ_DATA_FRAME.len();

    /// Build the frame that switches the meter to `mode`.
    pub fn set_mode(mode: MeasurementMode) -> Self {
        let mut buf = BytesMut::with_capacity(Self::SET_MODE_SIZE);
        buf.put_u8(FRAME_PREAMBLE);
        buf.put_slice(&FRAME_HEADER);
        buf.put_u8(OPCODE_SET_MODE);
        buf.put_u8(0x01);
        buf.put_u8(mode.selector());
        let checksum = xor_checksum(&buf);
        buf.put_u8(checksum);

        Self {
            kind: CommandKind::SetMode(mode),
            bytes: buf.freeze(),
        }
    }

    /// Build the data-read frame.
    pub fn read_data() -> Self {
        Self {
            kind: CommandKind::ReadData,
            bytes: Bytes::from_static(&READ_DATA_FRAME),
        }
    }

    /// Wrap arbitrary bytes for protocol exploration.
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self {
            kind: CommandKind::Raw,
            bytes: data.into(),
        }
    }

    /// The kind of command.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty. Only possible for raw frames.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lowercase hex representation of the frame.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Build a mode-select frame.
pub fn build_set_mode_request(mode: MeasurementMode) -> CommandFrame {
    CommandFrame::set_mode(mode)
}

/// Build the data-read frame.
pub fn build_read_data_request() -> CommandFrame {
    CommandFrame::read_data()
}
