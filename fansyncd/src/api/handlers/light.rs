//! Light and timer handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};
use axum::{extract::State, Json};
use fansync_core::api::{ApiResponse, LightOnRequest, TimerRequest};
use fansync_core::{DeviceStatus, TIMER_MAX};
use tracing::debug;

/// Turn the downlight on.
///
/// # Endpoint
///
/// `POST /api/v0/light/on`
///
/// # Request Body
///
/// Optional `{"brightness": 1-100}`; the last used level otherwise.
pub(crate) async fn light_on(
    State(state): State<AppState>,
    body: Option<Json<LightOnRequest>>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    let brightness = body.and_then(|Json(request)| request.brightness);
    debug!("Request: POST /api/v0/light/on (brightness={:?})", brightness);
    let status = state.commands.light_on(brightness).await?;
    api_ok!(status)
}

/// Turn the downlight off.
///
/// # Endpoint
///
/// `POST /api/v0/light/off`
pub(crate) async fn light_off(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    debug!("Request: POST /api/v0/light/off");
    let status = state.commands.light_off().await?;
    api_ok!(status)
}

/// Set the sleep timer.
///
/// # Endpoint
///
/// `POST /api/v0/timer`
///
/// # Request Body
///
/// `{"minutes": 0-360}`; 0 clears the timer.
pub(crate) async fn set_timer(
    State(state): State<AppState>,
    Json(request): Json<TimerRequest>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    debug!("Request: POST /api/v0/timer {}", request.minutes);

    if request.minutes > TIMER_MAX {
        return api_fail!(format!(
            "Timer must be 0-{} minutes, got {}",
            TIMER_MAX, request.minutes
        ));
    }

    let status = state.commands.set_timer(request.minutes).await?;
    api_ok!(status)
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::TestApp;
    use fansync_core::DeviceStatus;

    #[tokio::test]
    async fn test_light_on_off() {
        let app = TestApp::new(DeviceStatus {
            speed: 1,
            ..Default::default()
        });

        let (status, json) = app.post("/api/v0/light/on", r#"{"brightness": 40}"#).await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["downlight"], 40);
        assert_eq!(json["data"]["speed"], 1);

        let (status, json) = app.post("/api/v0/light/off", "").await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["downlight"], 0);

        let (_, json) = app.post("/api/v0/light/on", "{}").await;
        assert_eq!(json["data"]["downlight"], 40);
    }

    #[tokio::test]
    async fn test_timer() {
        let app = TestApp::new(DeviceStatus::default());

        let (status, json) = app.post("/api/v0/timer", r#"{"minutes": 360}"#).await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["timer_minutes"], 360);

        let (status, json) = app.post("/api/v0/timer", r#"{"minutes": 361}"#).await;
        assert_eq!(status, 400);
        assert_eq!(json["status"], "error");
    }
}
