//! Transport abstraction for the fan's GATT link
//!
//! The link manager never talks to a Bluetooth stack directly. It asks a
//! [`DeviceLocator`] for the device, asks the returned [`Connectable`] for a
//! [`Connection`], and from then on only writes command frames and reads
//! notification payloads. This enables testing without real hardware.

use async_trait::async_trait;
use fansync_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Write side of an open link
///
/// Frames can only be written to the command characteristic; there is no
/// way to address any other characteristic through this trait.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Write a frame to the command characteristic without waiting for a response
    async fn write_command(&self, frame: &[u8]) -> Result<()>;

    /// Close the link
    async fn disconnect(&self) -> Result<()>;
}

/// An open link: the write side plus the stream of notification payloads
pub struct Connection {
    pub transport: Box<dyn BleTransport>,
    pub notifications: mpsc::Receiver<Vec<u8>>,
}

/// A located device that can be connected to
#[async_trait]
pub trait Connectable: Send + Sync {
    /// Open a link and subscribe to notifications
    ///
    /// The transport must raise `link_lost` if the link drops on its own.
    async fn connect(&self, link_lost: LinkLostSignal) -> Result<Connection>;
}

/// Resolves the configured device into something connectable
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    /// Find the device; fails with `DeviceNotFound` when no adapter can see it
    async fn locate(&self) -> Result<Box<dyn Connectable>>;

    /// Human-readable identity for logs
    fn describe(&self) -> String;
}

/// Flag raised by the transport when the link drops without being asked to
///
/// Raised from the transport's own task, possibly while an exchange is in
/// flight, so it is a plain atomic rather than anything behind the link lock.
#[derive(Debug, Clone, Default)]
pub struct LinkLostSignal(Arc<AtomicBool>);

impl LinkLostSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the link as dropped
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_lost_signal_shared_between_clones() {
        let signal = LinkLostSignal::new();
        let transport_side = signal.clone();

        assert!(!signal.is_raised());
        transport_side.raise();
        assert!(signal.is_raised());
    }
}
