//! Status handlers: latest known state, fresh reads, and poll triggers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;
use axum::{extract::State, Json};
use fansync_core::api::{ApiResponse, StatusResponse};
use tracing::debug;

/// Return the latest known state without touching the device.
///
/// # Endpoint
///
/// `GET /api/v0/status`
///
/// # Returns
///
/// - `status` - last successfully polled state (absent before the first poll)
/// - `percentage` - fan speed as a percentage, alongside `status`
/// - `available` - false after repeated failed polls
/// - `poll_mode` - `slow` or `fast`
/// - `reversal` - present while a direction reversal is pending
pub(crate) async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    debug!("Request: GET /api/v0/status");
    api_ok!(state.status_response())
}

/// Read the device now and return the refreshed state.
///
/// A failure adds to the consecutive-failure count. A fast burst in progress
/// keeps all of its remaining cycles.
///
/// # Endpoint
///
/// `GET /api/v0/status/refresh`
pub(crate) async fn refresh_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    debug!("Request: GET /api/v0/status/refresh");
    state.commands.coordinator().refresh().await?;
    api_ok!(state.status_response())
}

/// Start a fast polling burst.
///
/// # Endpoint
///
/// `POST /api/v0/poll`
pub(crate) async fn start_fast_poll(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    debug!("Request: POST /api/v0/poll");
    state.commands.coordinator().start_fast_poll().await?;
    api_ok!(state.status_response())
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::TestApp;
    use fansync_core::DeviceStatus;

    fn spinning() -> DeviceStatus {
        DeviceStatus {
            speed: 3,
            downlight: 20,
            timer_minutes: 300,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_status_before_first_poll() {
        let app = TestApp::new(spinning());

        let (status, json) = app.get("/api/v0/status").await;

        assert_eq!(status, 200);
        assert!(json["data"]["status"].is_null());
        assert!(json["data"].get("percentage").is_none());
        assert_eq!(json["data"]["available"], true);
        assert_eq!(json["data"]["poll_mode"], "slow");
        assert!(app.fan.received_frames().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_reads_device() {
        let app = TestApp::new(spinning());

        let (status, json) = app.get("/api/v0/status/refresh").await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["status"]["speed"], 3);
        assert_eq!(json["data"]["status"]["timer_minutes"], 300);
        assert_eq!(json["data"]["percentage"], 100);

        // The cached value is now served without another exchange
        let frames = app.fan.received_frames().len();
        let (_, json) = app.get("/api/v0/status").await;
        assert_eq!(json["data"]["status"]["downlight"], 20);
        assert_eq!(app.fan.received_frames().len(), frames);
    }

    #[tokio::test]
    async fn test_refresh_unavailable_device() {
        let app = TestApp::new(spinning());
        app.fan.set_absent(true);

        let (status, json) = app.get("/api/v0/status/refresh").await;

        assert_eq!(status, 503);
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn test_poll_enters_fast_mode() {
        let app = TestApp::new(spinning());

        let (status, json) = app.post("/api/v0/poll", "").await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["poll_mode"], "fast");
    }

    #[tokio::test]
    async fn test_refresh_leaves_fast_burst_running() {
        let app = TestApp::new(spinning());
        app.post("/api/v0/poll", "").await;

        for _ in 0..3 {
            let (status, json) = app.get("/api/v0/status/refresh").await;
            assert_eq!(status, 200);
            assert_eq!(json["data"]["poll_mode"], "fast");
        }
        assert!(app.fan.is_connected());
    }
}
