//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts. Every section
//! and field falls back to its default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FanSyncError, Result};

/// Which fan to talk to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth address of the fan (e.g. "AA:BB:CC:DD:EE:FF")
    pub address: String,
    /// Friendly name used in logs
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            name: "Ceiling Fan".to_string(),
        }
    }
}

/// Link timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// How long to wait for the notification answering a command, in seconds
    pub reply_timeout_secs: u64,
    /// Connection attempts before giving up
    pub connect_attempts: u32,
    /// How long to scan for the device before reporting it missing, in seconds
    pub scan_timeout_secs: u64,
    /// Log every frame sent and received
    pub debug_frames: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: 5,
            connect_attempts: 3,
            scan_timeout_secs: 10,
            debug_frames: false,
        }
    }
}

impl LinkConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// Status polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Background interval between polls, in seconds
    pub slow_interval_secs: u64,
    /// Interval during the burst that follows a command, in seconds
    pub fast_interval_secs: u64,
    /// Number of successful polls in a fast burst
    pub fast_cycles: u32,
    /// Consecutive failures before the device is reported unavailable
    pub failure_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            slow_interval_secs: 300,
            fast_interval_secs: 1,
            fast_cycles: 3,
            failure_threshold: 3,
        }
    }
}

impl PollingConfig {
    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_interval_secs)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_secs(self.fast_interval_secs)
    }
}

/// Direction reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionConfig {
    /// Time the motor is left stopped before a reversal is applied, in seconds
    pub settle_secs: u64,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self { settle_secs: 60 }
    }
}

impl DirectionConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub hostname: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 3080,
        }
    }
}

/// Static configuration for the FanSync daemon.
///
/// Located at `~/.config/fansync/config.toml` by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub device: DeviceConfig,
    pub link: LinkConfig,
    pub polling: PollingConfig,
    pub direction: DirectionConfig,
    pub server: ServerConfig,
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Reject values that would stall the link or the poller.
    ///
    /// The device address is not checked here: mock mode runs without one.
    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            (self.link.reply_timeout_secs == 0, "link.reply_timeout_secs"),
            (self.link.connect_attempts == 0, "link.connect_attempts"),
            (self.link.scan_timeout_secs == 0, "link.scan_timeout_secs"),
            (self.polling.slow_interval_secs == 0, "polling.slow_interval_secs"),
            (self.polling.fast_interval_secs == 0, "polling.fast_interval_secs"),
            (self.polling.fast_cycles == 0, "polling.fast_cycles"),
            (self.polling.failure_threshold == 0, "polling.failure_threshold"),
        ];

        for (is_zero, field) in zero_checks {
            if is_zero {
                return Err(FanSyncError::Config(format!("{} must be greater than 0", field)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_static_config() {
        let config = StaticConfig::default();
        assert_eq!(config.link.reply_timeout(), Duration::from_secs(5));
        assert_eq!(config.link.connect_attempts, 3);
        assert_eq!(config.polling.slow_interval(), Duration::from_secs(300));
        assert_eq!(config.polling.fast_interval(), Duration::from_secs(1));
        assert_eq!(config.polling.fast_cycles, 3);
        assert_eq!(config.polling.failure_threshold, 3);
        assert_eq!(config.direction.settle(), Duration::from_secs(60));
        assert_eq!(config.server.port, 3080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_config_serialization() {
        let config = StaticConfig::default();
        let toml_str = config.to_toml().unwrap();

        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[link]"));
        assert!(toml_str.contains("[polling]"));
        assert!(toml_str.contains("[direction]"));
        assert!(toml_str.contains("[server]"));
    }

    #[test]
    fn test_static_config_deserialization() {
        let toml_str = r#"
            [device]
            address = "AA:BB:CC:DD:EE:FF"
            name = "Bedroom Fan"

            [polling]
            slow_interval_secs = 120
            fast_cycles = 5

            [server]
            port = 8080
        "#;

        let config = StaticConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.device.name, "Bedroom Fan");
        assert_eq!(config.polling.slow_interval_secs, 120);
        assert_eq!(config.polling.fast_cycles, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.polling.fast_interval_secs, 1);
        assert_eq!(config.polling.failure_threshold, 3);
        assert_eq!(config.link.reply_timeout_secs, 5);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.hostname, "127.0.0.1");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = StaticConfig::from_toml("").unwrap();
        assert_eq!(config.direction.settle_secs, 60);
        assert_eq!(config.device.name, "Ceiling Fan");
    }

    #[test]
    fn test_roundtrip_preserves_values() {
        let mut config = StaticConfig::default();
        config.device.address = "11:22:33:44:55:66".to_string();
        config.direction.settle_secs = 45;

        let parsed = StaticConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed.device.address, "11:22:33:44:55:66");
        assert_eq!(parsed.direction.settle_secs, 45);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = StaticConfig::default();
        config.polling.fast_cycles = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, FanSyncError::Config(ref msg) if msg.contains("fast_cycles")));

        let mut config = StaticConfig::default();
        config.link.reply_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
