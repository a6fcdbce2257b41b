//! Error types for the FanSync system

use std::time::Duration;
use thiserror::Error;

/// Core error type for FanSync operations
#[derive(Error, Debug)]
pub enum FanSyncError {
    /// Received frame is shorter than the fixed frame length
    #[error("Short frame: got {len} bytes, expected 10")]
    ShortFrame { len: usize },

    /// First byte of a frame is not the protocol sentinel
    #[error("Bad sentinel byte: 0x{0:02X}")]
    BadSentinel(u8),

    /// Trailing checksum does not match the sum of the first nine bytes
    #[error("Checksum mismatch: got 0x{actual:02X}, expected 0x{expected:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Refused to transmit a frame that does not follow the protocol layout
    #[error("Refusing to send malformed frame: {0}")]
    MalformedFrame(String),

    /// Device could not be located by any adapter
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connection could not be established
    #[error("Connection failed after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    /// No notification arrived before the reply timeout
    #[error("No reply within {0:?}")]
    NoReply(Duration),

    /// Link dropped while an exchange was in flight
    #[error("Device disconnected: {0}")]
    Disconnected(String),

    /// Bluetooth stack errors
    #[error("Bluetooth error: {0}")]
    Ble(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FanSyncError {
    /// Returns `true` for errors raised while validating a received frame.
    ///
    /// These are treated the same as "no usable reply": the frame is never
    /// trusted, not even partially.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            FanSyncError::ShortFrame { .. }
                | FanSyncError::BadSentinel(_)
                | FanSyncError::ChecksumMismatch { .. }
        )
    }

    /// Returns `true` for transient link errors that a later attempt may clear.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            FanSyncError::DeviceNotFound(_)
                | FanSyncError::ConnectFailed { .. }
                | FanSyncError::NoReply(_)
                | FanSyncError::Disconnected(_)
                | FanSyncError::Ble(_)
        )
    }
}

/// Result type alias for FanSync operations
pub type Result<T> = std::result::Result<T, FanSyncError>;
