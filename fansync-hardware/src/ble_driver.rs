//! Bluetooth LE driver built on btleplug
//!
//! The fan exposes one GATT service with a command characteristic (written
//! without response) and a notify characteristic that carries every reply.
//! Only those two characteristics are ever looked up.

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use fansync_core::{FanSyncError, Result};
use futures::StreamExt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::transport::{BleTransport, Connectable, Connection, DeviceLocator, LinkLostSignal};

/// Command characteristic (0xE001)
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x0000e001_0000_1000_8000_00805f9b34fb);

/// Notify characteristic (0xE002)
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000e002_0000_1000_8000_00805f9b34fb);

const NOTIFICATION_BUFFER: usize = 16;
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn ble_error(context: &str, e: btleplug::Error) -> FanSyncError {
    FanSyncError::Ble(format!("{}: {}", context, e))
}

/// Finds the fan by Bluetooth address on the first adapter
pub struct BtleplugLocator {
    address: BDAddr,
    name: String,
    scan_timeout: Duration,
}

impl BtleplugLocator {
    /// # Errors
    ///
    /// Returns `Config` if `address` is not a valid Bluetooth address.
    pub fn new(address: &str, name: &str, scan_timeout: Duration) -> Result<Self> {
        let parsed = BDAddr::from_str(address).map_err(|e| {
            FanSyncError::Config(format!("Invalid Bluetooth address '{}': {}", address, e))
        })?;
        Ok(Self {
            address: parsed,
            name: name.to_string(),
            scan_timeout,
        })
    }

    async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|e| ble_error("Bluetooth manager unavailable", e))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ble_error("Failed to list adapters", e))?;
        adapters.into_iter().next().ok_or_else(|| {
            error!("No Bluetooth adapter found");
            FanSyncError::Ble("No Bluetooth adapter found".to_string())
        })
    }

    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Option<Peripheral>> {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| ble_error("Failed to list peripherals", e))?;
        for peripheral in peripherals {
            let properties = peripheral
                .properties()
                .await
                .map_err(|e| ble_error("Failed to read peripheral properties", e))?;
            if let Some(props) = properties {
                if props.address == self.address {
                    debug!(
                        "Found {} ({:?}) rssi={:?}",
                        self.address, props.local_name, props.rssi
                    );
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DeviceLocator for BtleplugLocator {
    async fn locate(&self) -> Result<Box<dyn Connectable>> {
        let adapter = Self::first_adapter().await?;

        // A peripheral the adapter already knows needs no scan
        if let Some(peripheral) = self.find_peripheral(&adapter).await? {
            return Ok(Box::new(BtleplugPeripheral {
                adapter,
                peripheral,
            }));
        }

        debug!("Scanning for {} ({})", self.name, self.address);
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ble_error("Failed to start scan", e))?;

        let deadline = Instant::now() + self.scan_timeout;
        let mut found = None;
        while Instant::now() < deadline {
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            if let Some(peripheral) = self.find_peripheral(&adapter).await? {
                found = Some(peripheral);
                break;
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Some(peripheral) => Ok(Box::new(BtleplugPeripheral {
                adapter,
                peripheral,
            })),
            None => {
                warn!("{} not seen within {:?}", self.describe(), self.scan_timeout);
                Err(FanSyncError::DeviceNotFound(self.describe()))
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.address)
    }
}

/// A located fan, ready to connect
pub struct BtleplugPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugPeripheral {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| FanSyncError::Ble(format!("Characteristic {} not found", uuid)))
    }

    async fn open(&self, link_lost: LinkLostSignal) -> Result<Connection> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| ble_error("Service discovery failed", e))?;

        let command = self.characteristic(COMMAND_CHAR_UUID)?;
        let notify = self.characteristic(NOTIFY_CHAR_UUID)?;

        let mut stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| ble_error("Failed to open notification stream", e))?;
        self.peripheral
            .subscribe(&notify)
            .await
            .map_err(|e| ble_error("Failed to subscribe to notifications", e))?;

        let (tx, notifications) = mpsc::channel(NOTIFICATION_BUFFER);
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != NOTIFY_CHAR_UUID {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            debug!("Notification stream ended");
        });

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ble_error("Failed to watch adapter events", e))?;
        let id = self.peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        info!("Fan disconnected");
                        link_lost.raise();
                        break;
                    }
                }
            }
        });

        Ok(Connection {
            transport: Box::new(BtleplugTransport {
                peripheral: self.peripheral.clone(),
                command,
                tasks: vec![forwarder, watcher],
            }),
            notifications,
        })
    }
}

#[async_trait]
impl Connectable for BtleplugPeripheral {
    async fn connect(&self, link_lost: LinkLostSignal) -> Result<Connection> {
        self.peripheral
            .connect()
            .await
            .map_err(|e| ble_error("Connect failed", e))?;

        match self.open(link_lost).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                // Do not leave a half-open link behind
                let _ = self.peripheral.disconnect().await;
                Err(e)
            }
        }
    }
}

/// Open GATT link to the fan
pub struct BtleplugTransport {
    peripheral: Peripheral,
    command: Characteristic,
    tasks: Vec<JoinHandle<()>>,
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn write_command(&self, frame: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.command, frame, WriteType::WithoutResponse)
            .await
            .map_err(|e| ble_error("Write failed", e))
    }

    async fn disconnect(&self) -> Result<()> {
        for task in &self.tasks {
            task.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ble_error("Disconnect failed", e))
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "0000e001-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            NOTIFY_CHAR_UUID.to_string(),
            "0000e002-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_locator_parses_address() {
        let locator =
            BtleplugLocator::new("AA:BB:CC:DD:EE:FF", "Fan", Duration::from_secs(10)).unwrap();
        assert_eq!(locator.describe(), "Fan (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn test_locator_rejects_bad_address() {
        let result = BtleplugLocator::new("not-an-address", "Fan", Duration::from_secs(10));
        assert!(matches!(result, Err(FanSyncError::Config(_))));
    }
}
