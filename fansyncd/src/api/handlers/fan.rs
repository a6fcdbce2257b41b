//! Fan handlers for speed, direction, and raw state updates

use crate::api::error::ApiError;
use crate::api::{reversal_response, AppState};
use crate::api_ok;
use crate::direction::DirectionOutcome;
use axum::{extract::State, Json};
use fansync_core::api::{
    ApiResponse, DirectionChangeResponse, DirectionRequest, PercentageRequest, TurnOnRequest,
};
use fansync_core::{DeviceStatus, StateUpdate};
use tracing::debug;

/// Apply a partial state update.
///
/// Fields left out keep the value the device reports at the time of the
/// write. Direction is refused here; use the direction endpoint.
///
/// # Endpoint
///
/// `POST /api/v0/state`
///
/// # Request Body
///
/// `{"speed": 2, "downlight": 40, "timer_minutes": 60}` (all optional)
pub(crate) async fn set_state(
    State(state): State<AppState>,
    Json(update): Json<StateUpdate>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    debug!("Request: POST /api/v0/state {:?}", update);
    let status = state.commands.update(update).await?;
    api_ok!(status)
}

/// Turn the fan on.
///
/// # Endpoint
///
/// `POST /api/v0/fan/on`
///
/// # Request Body
///
/// Optional `{"speed": 1-3}`; the last used speed otherwise.
pub(crate) async fn turn_on(
    State(state): State<AppState>,
    body: Option<Json<TurnOnRequest>>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    let speed = body.and_then(|Json(request)| request.speed);
    debug!("Request: POST /api/v0/fan/on (speed={:?})", speed);
    let status = state.commands.turn_on(speed).await?;
    api_ok!(status)
}

/// Turn the fan off, cancelling any pending reversal.
///
/// # Endpoint
///
/// `POST /api/v0/fan/off`
pub(crate) async fn turn_off(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    debug!("Request: POST /api/v0/fan/off");
    let status = state.commands.turn_off().await?;
    api_ok!(status)
}

/// Set fan speed as a percentage.
///
/// 0 turns the fan off; anything else maps to the nearest of the three
/// speed steps.
///
/// # Endpoint
///
/// `POST /api/v0/fan/percentage`
pub(crate) async fn set_percentage(
    State(state): State<AppState>,
    Json(request): Json<PercentageRequest>,
) -> Result<Json<ApiResponse<DeviceStatus>>, ApiError> {
    debug!("Request: POST /api/v0/fan/percentage {}", request.percentage);
    let status = state.commands.set_percentage(request.percentage).await?;
    api_ok!(status)
}

/// Change the direction of rotation.
///
/// A spinning fan is stopped first and reversed once the motor has settled;
/// the response then describes the pending reversal.
///
/// # Endpoint
///
/// `POST /api/v0/fan/direction`
///
/// # Request Body
///
/// `{"direction": "forward" | "reverse"}`
pub(crate) async fn set_direction(
    State(state): State<AppState>,
    Json(request): Json<DirectionRequest>,
) -> Result<Json<ApiResponse<DirectionChangeResponse>>, ApiError> {
    debug!(
        "Request: POST /api/v0/fan/direction {}",
        request.direction.as_str()
    );
    let response = match state.commands.set_direction(request.direction).await? {
        DirectionOutcome::Applied(status) => DirectionChangeResponse::Applied { status },
        DirectionOutcome::Scheduled(reversal) => DirectionChangeResponse::Scheduled {
            reversal: reversal_response(&reversal),
        },
        DirectionOutcome::Unchanged(status) => DirectionChangeResponse::Unchanged { status },
        DirectionOutcome::Cancelled => DirectionChangeResponse::Cancelled,
    };
    api_ok!(response)
}

/// Cancel a pending reversal; succeeds when nothing is pending.
///
/// # Endpoint
///
/// `POST /api/v0/direction/cancel`
pub(crate) async fn cancel_direction(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    debug!("Request: POST /api/v0/direction/cancel");
    state.commands.sequencer().cancel();
    api_ok!(())
}

#[cfg(test)]
mod tests {
    use crate::api::handlers::test_support::TestApp;
    use fansync_core::DeviceStatus;

    fn spinning() -> DeviceStatus {
        DeviceStatus {
            speed: 2,
            direction: 0,
            downlight: 60,
            timer_minutes: 45,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_set_state_partial() {
        let app = TestApp::new(spinning());

        let (status, json) = app.post("/api/v0/state", r#"{"speed": 3}"#).await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["speed"], 3);
        assert_eq!(json["data"]["downlight"], 60);
        assert_eq!(json["data"]["timer_minutes"], 45);
    }

    #[tokio::test]
    async fn test_set_state_rejects_out_of_range() {
        let app = TestApp::new(spinning());

        let (status, _) = app.post("/api/v0/state", r#"{"downlight": 150}"#).await;
        assert_eq!(status, 400);

        let (status, _) = app
            .post("/api/v0/state", r#"{"direction": "reverse"}"#)
            .await;
        assert_eq!(status, 400);

        assert!(app.fan.received_frames().is_empty());
    }

    #[tokio::test]
    async fn test_turn_on_without_body() {
        let app = TestApp::new(DeviceStatus::default());

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/v0/fan/on")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, json) = app.send_raw(request).await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["speed"], 1);
    }

    #[tokio::test]
    async fn test_turn_on_off() {
        let app = TestApp::new(DeviceStatus::default());

        let (status, json) = app.post("/api/v0/fan/on", r#"{"speed": 3}"#).await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["speed"], 3);

        let (status, json) = app.post("/api/v0/fan/off", "").await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["speed"], 0);
    }

    #[tokio::test]
    async fn test_percentage() {
        let app = TestApp::new(DeviceStatus::default());

        let (status, json) = app
            .post("/api/v0/fan/percentage", r#"{"percentage": 50}"#)
            .await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["speed"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_scheduled_then_cancelled() {
        let app = TestApp::new(spinning());

        let (status, json) = app
            .post("/api/v0/fan/direction", r#"{"direction": "reverse"}"#)
            .await;
        assert_eq!(status, 200);
        assert_eq!(json["data"]["outcome"], "scheduled");
        assert_eq!(json["data"]["reversal"]["target_direction"], "reverse");
        assert_eq!(json["data"]["reversal"]["restore_speed"], 2);
        assert_eq!(json["data"]["reversal"]["remaining_secs"], 60);

        let (_, json) = app.get("/api/v0/status").await;
        assert_eq!(json["data"]["reversal"]["target_direction"], "reverse");

        let (status, _) = app.post("/api/v0/direction/cancel", "").await;
        assert_eq!(status, 200);
        let (_, json) = app.get("/api/v0/status").await;
        assert!(json["data"].get("reversal").is_none());
    }

    #[tokio::test]
    async fn test_direction_on_stopped_fan() {
        let app = TestApp::new(DeviceStatus::default());

        let (status, json) = app
            .post("/api/v0/fan/direction", r#"{"direction": "reverse"}"#)
            .await;

        assert_eq!(status, 200);
        assert_eq!(json["data"]["outcome"], "applied");
        assert_eq!(json["data"]["status"]["direction"], 1);
    }

    #[tokio::test]
    async fn test_direction_rejects_unknown_value() {
        let app = TestApp::new(DeviceStatus::default());

        let (status, _) = app
            .post("/api/v0/fan/direction", r#"{"direction": "sideways"}"#)
            .await;

        assert_eq!(status, 422);
    }
}
