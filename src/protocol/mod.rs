//! Protocol module for constructing commands and decoding responses.
//!
//! This module contains the implementations for:
//! - Command frame construction (mode select, data read, raw)
//! - Response frame decoding into calibrated readings
//! - XOR checksum calculation

pub mod checksum;
pub mod command;
pub mod response;

pub use checksum::xor_checksum;
pub use command::{CommandFrame, CommandKind, READ_DATA_FRAME};
pub use response::{decode, scale_factor, unit_and_mode, ResponseFrame};
