//! High-level device client
//!
//! Turns the raw exchanges offered by [`LinkManager`] into status reads and
//! partial state writes.

use fansync_core::protocol::{self, Command, FrameFields};
use fansync_core::{DeviceStatus, Result, StateUpdate};
use tracing::{debug, info, warn};

use crate::link_manager::{LinkGuard, LinkManager};

/// Client for a single fan
pub struct FanDevice {
    link: LinkManager,
    name: String,
}

impl FanDevice {
    pub fn new(link: LinkManager, name: impl Into<String>) -> Self {
        Self {
            link,
            name: name.into(),
        }
    }

    /// Display name of the fan
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Read the current state from the device
    ///
    /// # Errors
    ///
    /// Link errors (`DeviceNotFound`, `ConnectFailed`, `NoReply`,
    /// `Disconnected`) and decode errors of the reply are returned as-is.
    pub async fn get_status(&self) -> Result<DeviceStatus> {
        let mut guard = self.link.acquire().await;
        guard.ensure_connected().await?;
        let status = read_status(&mut guard).await?;
        debug!("Status of {}: {:?}", self.name, status);
        Ok(status)
    }

    /// Apply a partial update and return the state read back afterwards
    ///
    /// Reads the current state, merges `update` over it, writes the merged
    /// state, then reads again. All three exchanges run under one lock so no
    /// other exchange can land between them. Fields not named in `update`
    /// keep the values the device reported in the first read.
    pub async fn set_state(&self, update: &StateUpdate) -> Result<DeviceStatus> {
        update.validate()?;

        let mut guard = self.link.acquire().await;
        guard.ensure_connected().await?;

        let current = read_status(&mut guard).await?;
        self.write_and_verify(&mut guard, update, current).await
    }

    /// Like [`set_state`](Self::set_state), but only writes if `accept`
    /// approves the state read under the same lock
    ///
    /// Returns `Ok(None)` without writing when `accept` refuses.
    pub async fn set_state_if(
        &self,
        update: &StateUpdate,
        accept: impl FnOnce(&DeviceStatus) -> bool,
    ) -> Result<Option<DeviceStatus>> {
        update.validate()?;

        let mut guard = self.link.acquire().await;
        guard.ensure_connected().await?;

        let current = read_status(&mut guard).await?;
        if !accept(&current) {
            debug!("Write to {} skipped at {:?}", self.name, current);
            return Ok(None);
        }
        self.write_and_verify(&mut guard, update, current)
            .await
            .map(Some)
    }

    /// Release the link
    pub async fn disconnect(&self) {
        self.link.disconnect().await
    }

    async fn write_and_verify(
        &self,
        guard: &mut LinkGuard<'_>,
        update: &StateUpdate,
        current: DeviceStatus,
    ) -> Result<DeviceStatus> {
        let fields = update.merge_over(&current);
        debug!("Writing {:?} to {} (was {:?})", fields, self.name, current);

        // The echo of a write is not authoritative, only its arrival matters
        let frame = protocol::encode(Command::SetState, &fields);
        let timeout = guard.reply_timeout();
        guard.send_and_await_reply(&frame, timeout).await?;

        let verified = read_status(guard).await?;
        if !matches_written(&verified, &fields) {
            warn!(
                "{} reports {:?} after writing {:?}",
                self.name, verified, fields
            );
        } else {
            info!("Updated {}: {:?}", self.name, verified);
        }
        Ok(verified)
    }
}

async fn read_status(guard: &mut LinkGuard<'_>) -> Result<DeviceStatus> {
    let frame = protocol::encode(Command::GetStatus, &FrameFields::default());
    let timeout = guard.reply_timeout();
    let reply = guard.send_and_await_reply(&frame, timeout).await?;

    match protocol::decode(&reply) {
        Ok(status) => {
            if reply.get(1) != Some(&(Command::StatusResponse as u8)) {
                debug!(
                    "Status reply carries command byte {:?}",
                    reply.get(1).map(|b| format!("0x{:02X}", b))
                );
            }
            Ok(status)
        }
        Err(e) => {
            warn!("Rejected reply {}: {}", protocol::hex(&reply), e);
            Err(e)
        }
    }
}

fn matches_written(status: &DeviceStatus, fields: &FrameFields) -> bool {
    status.speed == fields.speed
        && status.direction == fields.direction
        && status.downlight == fields.downlight
        && status.timer_minutes == fields.timer_minutes
}
