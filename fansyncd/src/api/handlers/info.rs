//! Info handler for the root endpoint

use crate::api::error::ApiError;
use crate::api::AppState;

use axum::{extract::State, Json};
use fansync_core::api::ApiResponse;
use serde_json::{json, Value};
use tracing::debug;

/// Handle the root endpoint.
///
/// Provide basic service identification and status. Useful for health checks
/// and verifying the API is accessible.
///
/// # Endpoint
///
/// `GET /`
pub(crate) async fn root(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    debug!("Request: GET /");

    let device = state.commands.coordinator().device();
    let link = device.link().state();

    let data = json!({
        "service": "FanSync Ceiling Fan API Server",
        "version": env!("CARGO_PKG_VERSION"),
        "fan": device.name(),
        "link": link.as_str(),
        "uptime": state.start_time.elapsed().as_secs(),
        "status": "ok"
    });

    Ok(Json(ApiResponse::success(data)))
}
