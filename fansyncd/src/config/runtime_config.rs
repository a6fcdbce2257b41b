//! Runtime configuration management
//!
//! Loads the static TOML configuration once at startup, writing a default
//! file when none exists, and applies command-line overrides on top.

use fansync_core::{FanSyncError, Result, StaticConfig};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration the daemon runs with
pub(crate) struct RuntimeConfig {
    /// Static configuration (immutable after load)
    static_config: StaticConfig,
    /// File the configuration was read from
    path: PathBuf,
}

impl RuntimeConfig {
    /// Load configuration from disk.
    ///
    /// If the file doesn't exist, creates it with defaults.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use std::path::Path;
    ///
    /// let config = RuntimeConfig::load(Path::new("/etc/fansync/config.toml")).await?;
    /// println!("Fan address: {}", config.static_config().device.address);
    /// ```
    pub async fn load(config_path: &Path) -> Result<Self> {
        info!("Loading configuration from: {}", config_path.display());

        let static_config = Self::load_static_config(config_path).await?;
        static_config.validate()?;

        debug!("--- Device ---");
        debug!("  Address: {}", static_config.device.address);
        debug!("  Name: {}", static_config.device.name);
        debug!("--- Link ---");
        debug!("  Reply timeout: {}s", static_config.link.reply_timeout_secs);
        debug!("  Connect attempts: {}", static_config.link.connect_attempts);
        debug!("--- Polling ---");
        debug!(
            "  Slow: {}s, fast: {}s x{}",
            static_config.polling.slow_interval_secs,
            static_config.polling.fast_interval_secs,
            static_config.polling.fast_cycles
        );

        Ok(Self {
            static_config,
            path: config_path.to_path_buf(),
        })
    }

    /// Load static config from TOML file, creating with defaults if missing.
    async fn load_static_config(path: &Path) -> Result<StaticConfig> {
        if !path.exists() {
            info!(
                "Static config not found at {}. Creating with defaults.",
                path.display()
            );

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    FanSyncError::Config(format!(
                        "Failed to create config directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }

            let config = StaticConfig::default();
            let toml_str = config
                .to_toml()
                .map_err(|e| FanSyncError::Config(format!("Failed to serialize config: {}", e)))?;

            fs::write(path, &toml_str)
                .await
                .map_err(|e| FanSyncError::Config(format!("Failed to write config file: {}", e)))?;

            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| FanSyncError::Config(format!("Failed to read config file: {}", e)))?;

        StaticConfig::from_toml(&content)
            .map_err(|e| FanSyncError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Get the static configuration
    pub fn static_config(&self) -> &StaticConfig {
        &self.static_config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Override the device address (from `--address`)
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.static_config.device.address = address.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_creates_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = RuntimeConfig::load(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(config.static_config().server.port, 3080);
        assert_eq!(config.static_config().polling.fast_cycles, 3);
        assert_eq!(config.path(), path.as_path());

        // The written file loads back to the same values
        let reloaded = RuntimeConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.static_config().link.reply_timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_load_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            "[device]\naddress = \"AA:BB:CC:DD:EE:FF\"\n\n[direction]\nsettle_secs = 90\n",
        )
        .await
        .unwrap();

        let config = RuntimeConfig::load(&path).await.unwrap();

        assert_eq!(config.static_config().device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.static_config().direction.settle_secs, 90);
        assert_eq!(config.static_config().polling.slow_interval_secs, 300);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        fs::write(&path, "[polling]\nfast_cycles = 0\n").await.unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path).await,
            Err(FanSyncError::Config(_))
        ));

        fs::write(&path, "this is not toml = = =").await.unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path).await,
            Err(FanSyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_address_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = RuntimeConfig::load(&path).await.unwrap();
        config.set_address("11:22:33:44:55:66");

        assert_eq!(config.static_config().device.address, "11:22:33:44:55:66");
    }
}
