//! FanSync Core Library
//!
//! Shared types, the binary wire protocol and configuration for FanSync
//! Bluetooth ceiling fans. Used by the hardware driver and the daemon.

pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use config::{
    default_config_path, DeviceConfig, DirectionConfig, LinkConfig, PollingConfig, ServerConfig,
    StaticConfig,
};
pub use error::*;
pub use protocol::{Command, Frame, FrameFields, FRAME_LEN, START_BYTE};
pub use types::*;
