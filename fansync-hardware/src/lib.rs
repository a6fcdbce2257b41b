//! fansync-hardware
//!
//! Device-side crate: the transport boundary, the btleplug driver, a
//! simulated fan, and the two layers that sit on top of any transport.
//!
//! Public API:
//! - `link_manager::LinkManager` - owns the single link and serializes exchanges
//! - `fan_device::FanDevice` - status reads and read-merge-write-verify updates
//! - `ble_driver::BtleplugLocator` - finds the real fan over Bluetooth LE
//! - `simulated::SimulatedFan` - in-memory fan for mock mode and tests

pub mod ble_driver;
pub mod fan_device;
pub mod link_manager;
pub mod simulated;
pub mod transport;

pub use ble_driver::BtleplugLocator;
pub use fan_device::FanDevice;
pub use link_manager::{LinkGuard, LinkManager, LinkState};
pub use simulated::{ReplyMode, SimulatedFan};
pub use transport::{BleTransport, Connectable, Connection, DeviceLocator, LinkLostSignal};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_present() {
        let _ = std::any::TypeId::of::<FanDevice>();
        let _ = std::any::TypeId::of::<LinkManager>();
        let _ = std::any::TypeId::of::<SimulatedFan>();
    }
}
