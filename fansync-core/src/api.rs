//! API models for the FanSync REST API
//!
//! This module contains request and response models for the FanSync REST API.

use crate::types::{DeviceStatus, Direction};
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { data: T },
    #[serde(rename = "error")]
    Error { error: String },
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Create an error response
    pub fn error(error: String) -> Self {
        Self::Error { error }
    }
}

/// Pending direction reversal, as shown while the motor settles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalResponse {
    /// Direction that will be applied at the deadline
    pub target_direction: Direction,
    /// Speed restored together with the new direction
    pub restore_speed: u8,
    /// Seconds until the reversal is applied
    pub remaining_secs: u64,
}

/// Latest known device state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Last successfully polled status (None before the first successful poll)
    pub status: Option<DeviceStatus>,
    /// Fan speed as a percentage of the highest step, when a status is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    /// False once consecutive poll failures reach the threshold
    pub available: bool,
    /// Consecutive failed polls
    pub consecutive_failures: u32,
    /// "slow" or "fast"
    pub poll_mode: String,
    /// Present while a direction reversal is pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversal: Option<ReversalResponse>,
}

/// Request body for `POST /api/v0/fan/on`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnOnRequest {
    /// Speed step (1-3); the last used speed when omitted
    #[serde(default)]
    pub speed: Option<u8>,
}

/// Request body for `POST /api/v0/fan/percentage`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentageRequest {
    pub percentage: u8,
}

/// Request body for `POST /api/v0/fan/direction`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionRequest {
    pub direction: Direction,
}

/// Request body for `POST /api/v0/light/on`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightOnRequest {
    /// Downlight level (1-100); the last used level when omitted
    #[serde(default)]
    pub brightness: Option<u8>,
}

/// Request body for `POST /api/v0/timer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerRequest {
    pub minutes: u16,
}

/// Outcome of a direction change request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DirectionChangeResponse {
    /// Motor was stopped; direction applied immediately
    Applied { status: DeviceStatus },
    /// Motor stopped; reversal pending until the settle deadline
    Scheduled { reversal: ReversalResponse },
    /// Already turning in the requested direction
    Unchanged { status: DeviceStatus },
    /// Superseded by another command before the motor had stopped
    Cancelled,
}
