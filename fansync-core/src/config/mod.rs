//! Configuration types for FanSync
//!
//! [`StaticConfig`] holds the device address, link timing, polling cadence,
//! direction settle time and server settings. It is loaded once at startup
//! from a TOML file and stays immutable afterwards.

mod paths;
mod static_config;

pub use paths::default_config_path;
pub use static_config::{
    DeviceConfig, DirectionConfig, LinkConfig, PollingConfig, ServerConfig, StaticConfig,
};
