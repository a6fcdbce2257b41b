//! User-facing fan and light commands
//!
//! Each command writes through the device client and then starts a fast
//! poll so observers see the result within one short interval. Speed
//! changes and turning the fan off cancel a pending direction reversal
//! first, since the captured restore speed would otherwise overwrite them.

use fansync_core::{
    percentage_to_speed, DeviceStatus, Direction, FanSyncError, Result, StateUpdate,
    DOWNLIGHT_MAX, SPEED_HIGH, SPEED_LOW, SPEED_OFF,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::direction::{DirectionOutcome, DirectionSequencer};
use crate::polling::{LatestStatus, PollingCoordinator};

/// Command surface shared by the REST handlers
pub(crate) struct FanCommands {
    coordinator: Arc<PollingCoordinator>,
    sequencer: Arc<DirectionSequencer>,
    last_speed: AtomicU8,
    last_brightness: AtomicU8,
}

impl FanCommands {
    pub fn new(coordinator: Arc<PollingCoordinator>, sequencer: Arc<DirectionSequencer>) -> Self {
        Self {
            coordinator,
            sequencer,
            last_speed: AtomicU8::new(SPEED_LOW),
            last_brightness: AtomicU8::new(DOWNLIGHT_MAX),
        }
    }

    pub fn coordinator(&self) -> &Arc<PollingCoordinator> {
        &self.coordinator
    }

    pub fn sequencer(&self) -> &Arc<DirectionSequencer> {
        &self.sequencer
    }

    /// Speed used by `turn_on` when none is given
    pub fn last_speed(&self) -> u8 {
        self.last_speed.load(Ordering::Relaxed)
    }

    /// Downlight level used by `light_on` when none is given
    pub fn last_brightness(&self) -> u8 {
        self.last_brightness.load(Ordering::Relaxed)
    }

    /// Start the fan at `speed`, or at the last speed it ran at
    pub async fn turn_on(&self, speed: Option<u8>) -> Result<DeviceStatus> {
        let speed = speed.unwrap_or_else(|| self.last_speed());
        if speed == SPEED_OFF {
            return Err(FanSyncError::InvalidInput(format!(
                "Speed must be {}-{} to turn on",
                SPEED_LOW, SPEED_HIGH
            )));
        }
        self.set_speed(speed).await
    }

    pub async fn turn_off(&self) -> Result<DeviceStatus> {
        self.set_speed(SPEED_OFF).await
    }

    /// Set a speed step (0 turns the fan off)
    pub async fn set_speed(&self, speed: u8) -> Result<DeviceStatus> {
        let update = StateUpdate::speed(speed);
        update.validate()?;
        self.sequencer.cancel();
        self.apply(update).await
    }

    /// Set speed from a percentage; 0 turns the fan off
    pub async fn set_percentage(&self, percentage: u8) -> Result<DeviceStatus> {
        if percentage > 100 {
            return Err(FanSyncError::InvalidInput(format!(
                "Percentage must be 0-100, got {}",
                percentage
            )));
        }
        self.set_speed(percentage_to_speed(percentage)).await
    }

    /// Change direction, stopping and settling first if the fan spins
    pub async fn set_direction(&self, direction: Direction) -> Result<DirectionOutcome> {
        self.sequencer.request(direction).await
    }

    pub async fn set_downlight(&self, level: u8) -> Result<DeviceStatus> {
        self.apply(StateUpdate::downlight(level)).await
    }

    /// Turn the downlight on at `brightness`, or at its last level
    pub async fn light_on(&self, brightness: Option<u8>) -> Result<DeviceStatus> {
        let level = match brightness {
            Some(level) if level > DOWNLIGHT_MAX => {
                return Err(FanSyncError::InvalidInput(format!(
                    "Brightness must be 1-{}, got {}",
                    DOWNLIGHT_MAX, level
                )))
            }
            Some(level) => level.max(1),
            None => self.last_brightness(),
        };
        self.set_downlight(level).await
    }

    pub async fn light_off(&self) -> Result<DeviceStatus> {
        self.set_downlight(0).await
    }

    /// Set the sleep timer in minutes (0 clears it)
    pub async fn set_timer(&self, minutes: u16) -> Result<DeviceStatus> {
        self.apply(StateUpdate::timer(minutes)).await
    }

    /// Apply a raw partial update
    ///
    /// Direction is refused here: a reversal must go through
    /// [`set_direction`](Self::set_direction) so a spinning motor is stopped first.
    pub async fn update(&self, update: StateUpdate) -> Result<DeviceStatus> {
        if update.direction.is_some() {
            return Err(FanSyncError::InvalidInput(
                "Direction changes go through /api/v0/fan/direction".to_string(),
            ));
        }
        if update.is_empty() {
            return Err(FanSyncError::InvalidInput("Empty update".to_string()));
        }
        update.validate()?;
        if update.speed.is_some() {
            self.sequencer.cancel();
        }
        self.apply(update).await
    }

    /// Remember non-zero speed and brightness, including remote changes
    pub fn remember(&self, status: &DeviceStatus) {
        if status.speed > SPEED_OFF {
            self.last_speed.store(status.speed, Ordering::Relaxed);
        }
        if status.downlight > 0 {
            self.last_brightness.store(status.downlight, Ordering::Relaxed);
        }
    }

    /// Start following the poller; call before the first poll so it is seen
    pub fn spawn_tracker(self: &Arc<Self>) -> JoinHandle<()> {
        let updates = self.coordinator.subscribe();
        tokio::spawn(self.clone().track(updates))
    }

    /// Follow polled state so remote changes update the remembered levels
    pub async fn track(self: Arc<Self>, mut updates: watch::Receiver<LatestStatus>) {
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().status;
            if let Some(status) = status {
                self.remember(&status);
            }
        }
    }

    async fn apply(&self, update: StateUpdate) -> Result<DeviceStatus> {
        let status = self.coordinator.device().set_state(&update).await?;
        self.remember(&status);
        if let Err(e) = self.coordinator.start_fast_poll().await {
            debug!("Fast poll after command failed: {}", e);
        }
        Ok(status)
    }
}
