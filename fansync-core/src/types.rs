//! Core types and data structures for FanSync

use serde::{Deserialize, Serialize};

use crate::error::{FanSyncError, Result};
use crate::protocol::FrameFields;

/// Motor stopped
pub const SPEED_OFF: u8 = 0;
/// Lowest speed step
pub const SPEED_LOW: u8 = 1;
/// Middle speed step
pub const SPEED_MED: u8 = 2;
/// Highest speed step
pub const SPEED_HIGH: u8 = 3;

/// Non-zero speeds in ascending order
pub const ORDERED_SPEEDS: [u8; 3] = [SPEED_LOW, SPEED_MED, SPEED_HIGH];

/// Maximum downlight level (percent)
pub const DOWNLIGHT_MAX: u8 = 100;

/// Maximum sleep timer (6 hours, in minutes)
pub const TIMER_MAX: u16 = 360;

/// Rotation direction of the motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Wire value for this direction
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    /// Parse a wire value; anything other than 0 or 1 is unknown
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Direction::Forward),
            1 => Some(Direction::Reverse),
            _ => None,
        }
    }

    /// Get a string representation for API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }
}

/// Decoded snapshot of the device state
///
/// Only ever produced by [`crate::protocol::decode`] from a frame with a
/// valid sentinel and checksum. `timer_minutes` counts down on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// 0 off, 1 low, 2 medium, 3 high
    pub speed: u8,
    /// 0 forward, 1 reverse
    pub direction: u8,
    /// Uplight level (0-100); read only
    pub uplight: u8,
    /// Downlight level (0-100)
    pub downlight: u8,
    /// Remaining sleep timer in minutes, 0 when inactive
    pub timer_minutes: u16,
    /// Hardware variant reported by the device
    pub fan_type: u8,
}

impl DeviceStatus {
    /// Whether the motor is turning
    pub fn is_spinning(&self) -> bool {
        self.speed > SPEED_OFF
    }

    /// Typed direction, if the device reported a known value
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_byte(self.direction)
    }

    /// Speed as a percentage of the highest step (0, 33, 66, 100)
    pub fn percentage(&self) -> u8 {
        speed_to_percentage(self.speed)
    }
}

/// Partial state update: `None` fields keep the device's current value
///
/// Merged over a freshly read [`DeviceStatus`] immediately before writing so
/// that changes made with the RF remote are never clobbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downlight: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_minutes: Option<u16>,
}

impl StateUpdate {
    /// Update that only changes the speed
    pub fn speed(speed: u8) -> Self {
        Self {
            speed: Some(speed),
            ..Default::default()
        }
    }

    /// Update that only changes the direction
    pub fn direction(direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            ..Default::default()
        }
    }

    /// Update that only changes the downlight level
    pub fn downlight(level: u8) -> Self {
        Self {
            downlight: Some(level),
            ..Default::default()
        }
    }

    /// Update that only changes the sleep timer
    pub fn timer(minutes: u16) -> Self {
        Self {
            timer_minutes: Some(minutes),
            ..Default::default()
        }
    }

    /// Also set the speed
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Also set the direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Returns `true` when no field is set
    pub fn is_empty(&self) -> bool {
        self.speed.is_none()
            && self.direction.is_none()
            && self.downlight.is_none()
            && self.timer_minutes.is_none()
    }

    /// Check every supplied field against its domain
    pub fn validate(&self) -> Result<()> {
        if let Some(speed) = self.speed {
            if speed > SPEED_HIGH {
                return Err(FanSyncError::InvalidInput(format!(
                    "Speed must be 0-{}, got {}",
                    SPEED_HIGH, speed
                )));
            }
        }
        if let Some(level) = self.downlight {
            if level > DOWNLIGHT_MAX {
                return Err(FanSyncError::InvalidInput(format!(
                    "Downlight must be 0-{}, got {}",
                    DOWNLIGHT_MAX, level
                )));
            }
        }
        if let Some(minutes) = self.timer_minutes {
            if minutes > TIMER_MAX {
                return Err(FanSyncError::InvalidInput(format!(
                    "Timer must be 0-{} minutes, got {}",
                    TIMER_MAX, minutes
                )));
            }
        }
        Ok(())
    }

    /// Merge this update over `current`, producing the fields for a SET_STATE frame
    ///
    /// The uplight is never driven and is written as zero, as is the fan type.
    pub fn merge_over(&self, current: &DeviceStatus) -> FrameFields {
        FrameFields {
            speed: self.speed.unwrap_or(current.speed),
            direction: self
                .direction
                .map(Direction::as_byte)
                .unwrap_or(current.direction),
            uplight: 0,
            downlight: self.downlight.unwrap_or(current.downlight),
            timer_minutes: self.timer_minutes.unwrap_or(current.timer_minutes),
            fan_type: 0,
        }
    }
}

/// Map a speed step onto a percentage: off → 0, low → 33, med → 66, high → 100
pub fn speed_to_percentage(speed: u8) -> u8 {
    match ORDERED_SPEEDS.iter().position(|&s| s == speed) {
        Some(index) => (((index + 1) * 100) / ORDERED_SPEEDS.len()) as u8,
        None => 0,
    }
}

/// Map a percentage onto the smallest speed step whose band contains it
///
/// 0 → off, 1-33 → low, 34-66 → med, 67-100 → high.
pub fn percentage_to_speed(percentage: u8) -> u8 {
    if percentage == 0 {
        return SPEED_OFF;
    }
    let len = ORDERED_SPEEDS.len();
    for (offset, &speed) in ORDERED_SPEEDS.iter().enumerate() {
        let upper_bound = ((offset + 1) * 100) / len;
        if percentage as usize <= upper_bound {
            return speed;
        }
    }
    SPEED_HIGH
}
