//! Wire protocol for the fan's command/notify characteristic pair
//!
//! Every message in either direction is a fixed 10-byte frame:
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | sentinel (`0x53`) |
//! | 1 | command code |
//! | 2 | speed (0-3) |
//! | 3 | direction (0 forward, 1 reverse) |
//! | 4 | uplight (0-100) |
//! | 5 | downlight (0-100) |
//! | 6 | timer minutes, high byte |
//! | 7 | timer minutes, low byte |
//! | 8 | fan type |
//! | 9 | checksum: sum of bytes 0-8, mod 256 |
//!
//! The functions here are pure: no I/O, no state.

use crate::error::{FanSyncError, Result};
use crate::types::DeviceStatus;

/// Leading byte of every valid frame
pub const START_BYTE: u8 = 0x53;

/// Fixed length of every frame
pub const FRAME_LEN: usize = 10;

/// An encoded frame ready for transmission
pub type Frame = [u8; FRAME_LEN];

const CHECKSUM_OFFSET: usize = FRAME_LEN - 1;

/// Command codes carried in byte 1
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request the current state (0x30)
    GetStatus = 0x30,
    /// Write a complete state (0x31)
    SetState = 0x31,
    /// Status reply sent by the device (0x32)
    StatusResponse = 0x32,
}

impl Command {
    /// Map a raw command byte back to a known command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x30 => Some(Command::GetStatus),
            0x31 => Some(Command::SetState),
            0x32 => Some(Command::StatusResponse),
            _ => None,
        }
    }
}

/// Payload fields placed at bytes 2-8 of a frame
///
/// Values are written as-is; range checks belong to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFields {
    pub speed: u8,
    pub direction: u8,
    pub uplight: u8,
    pub downlight: u8,
    pub timer_minutes: u16,
    pub fan_type: u8,
}

/// Sum of `bytes`, wrapping at 256
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Split a timer value into big-endian (high, low) bytes
///
/// - 0 → (0x00, 0x00)
/// - 300 (0x012C) → (0x01, 0x2C)
/// - 360 (0x0168) → (0x01, 0x68)
#[inline]
pub fn timer_to_bytes(minutes: u16) -> (u8, u8) {
    let [high, low] = minutes.to_be_bytes();
    (high, low)
}

/// Encode a command and its payload into a frame
pub fn encode(command: Command, fields: &FrameFields) -> Frame {
    let (timer_high, timer_low) = timer_to_bytes(fields.timer_minutes);
    let mut frame = [
        START_BYTE,
        command as u8,
        fields.speed,
        fields.direction,
        fields.uplight,
        fields.downlight,
        timer_high,
        timer_low,
        fields.fan_type,
        0,
    ];
    frame[CHECKSUM_OFFSET] = checksum(&frame[..CHECKSUM_OFFSET]);
    frame
}

/// Decode a received frame into a [`DeviceStatus`]
///
/// Bytes past offset 9 are ignored. The command byte is not checked: the
/// device answers both GET_STATUS and SET_STATE with a status layout.
pub fn decode(bytes: &[u8]) -> Result<DeviceStatus> {
    if bytes.len() < FRAME_LEN {
        return Err(FanSyncError::ShortFrame { len: bytes.len() });
    }

    let frame = &bytes[..FRAME_LEN];

    if frame[0] != START_BYTE {
        return Err(FanSyncError::BadSentinel(frame[0]));
    }

    let expected = checksum(&frame[..CHECKSUM_OFFSET]);
    if frame[CHECKSUM_OFFSET] != expected {
        return Err(FanSyncError::ChecksumMismatch {
            expected,
            actual: frame[CHECKSUM_OFFSET],
        });
    }

    Ok(DeviceStatus {
        speed: frame[2],
        direction: frame[3],
        uplight: frame[4],
        downlight: frame[5],
        timer_minutes: u16::from_be_bytes([frame[6], frame[7]]),
        fan_type: frame[8],
    })
}

/// Check that an outgoing frame follows the protocol layout
///
/// Anything that is not exactly 10 bytes starting with the sentinel is
/// refused before it reaches the radio.
pub fn validate_outgoing(frame: &[u8]) -> Result<()> {
    match frame.first() {
        Some(&START_BYTE) if frame.len() == FRAME_LEN => Ok(()),
        first => Err(FanSyncError::MalformedFrame(format!(
            "len={}, start={}; expected {} bytes starting with 0x{:02X}",
            frame.len(),
            first.map_or_else(|| "none".to_string(), |b| format!("0x{:02X}", b)),
            FRAME_LEN,
            START_BYTE
        ))),
    }
}

/// Render a frame as space-separated hex for logging
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
