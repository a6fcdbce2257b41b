//! API module for the FanSync daemon
//!
//! Contains the REST API implementation with Axum router and handlers.

pub(crate) mod handlers;

use crate::commands::FanCommands;
use crate::direction::PendingReversal;
use crate::polling::LatestStatus;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use fansync_core::api::{ReversalResponse, StatusResponse};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    /// Fan and light commands, plus the poller and sequencer behind them
    pub commands: Arc<FanCommands>,
    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(commands: Arc<FanCommands>) -> Self {
        Self {
            commands,
            start_time: Instant::now(),
        }
    }

    /// Latest known state as served to clients
    pub fn status_response(&self) -> StatusResponse {
        let latest = self.commands.coordinator().snapshot();
        let reversal = self.commands.sequencer().pending();
        build_status_response(&latest, reversal.as_ref())
    }
}

pub(crate) fn build_status_response(
    latest: &LatestStatus,
    reversal: Option<&PendingReversal>,
) -> StatusResponse {
    StatusResponse {
        status: latest.status,
        percentage: latest.status.map(|status| status.percentage()),
        available: latest.available,
        consecutive_failures: latest.consecutive_failures,
        poll_mode: latest.mode.as_str().to_string(),
        reversal: reversal.map(reversal_response),
    }
}

pub(crate) fn reversal_response(reversal: &PendingReversal) -> ReversalResponse {
    ReversalResponse {
        target_direction: reversal.target,
        restore_speed: reversal.restore_speed,
        remaining_secs: reversal.remaining().as_secs(),
    }
}

/// Create the main API router with all endpoints
pub(crate) fn create_router(state: AppState) -> Router {
    info!("Setting up API router...");

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024));

    Router::new()
        // Status endpoints
        .route("/api/v0/status", get(handlers::status::get_status))
        .route(
            "/api/v0/status/refresh",
            get(handlers::status::refresh_status),
        )
        .route("/api/v0/poll", post(handlers::status::start_fast_poll))
        // State endpoint
        .route("/api/v0/state", post(handlers::fan::set_state))
        // Fan endpoints
        .route("/api/v0/fan/on", post(handlers::fan::turn_on))
        .route("/api/v0/fan/off", post(handlers::fan::turn_off))
        .route(
            "/api/v0/fan/percentage",
            post(handlers::fan::set_percentage),
        )
        .route("/api/v0/fan/direction", post(handlers::fan::set_direction))
        .route(
            "/api/v0/direction/cancel",
            post(handlers::fan::cancel_direction),
        )
        // Light and timer endpoints
        .route("/api/v0/light/on", post(handlers::light::light_on))
        .route("/api/v0/light/off", post(handlers::light::light_off))
        .route("/api/v0/timer", post(handlers::light::set_timer))
        // Root endpoint
        .route("/", get(handlers::info::root))
        .layer(middleware_stack)
        .with_state(state)
}

/// Error handling utilities
pub(crate) mod error {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use fansync_core::api::ApiResponse;
    use fansync_core::FanSyncError;

    use tracing::error;

    /// Custom error type for API responses
    #[derive(Debug)]
    pub struct ApiError {
        pub status_code: StatusCode,
        pub message: String,
    }

    impl ApiError {
        /// Create a new API error
        pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
            Self {
                status_code,
                message: message.into(),
            }
        }

        /// Create a bad request error
        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::new(StatusCode::BAD_REQUEST, message)
        }

        /// Create an internal server error
        pub fn internal_error(message: impl Into<String>) -> Self {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }

        /// Create a service unavailable error (for link issues)
        pub fn service_unavailable(message: impl Into<String>) -> Self {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            error!("API Error {}: {}", self.status_code, self.message);

            let response: ApiResponse<()> = ApiResponse::error(self.message);

            (self.status_code, Json(response)).into_response()
        }
    }

    /// Convert FanSyncError to ApiError
    impl From<FanSyncError> for ApiError {
        fn from(err: FanSyncError) -> Self {
            match err {
                FanSyncError::InvalidInput(msg) => Self::bad_request(msg),
                err if err.is_link_error() || err.is_protocol_error() => {
                    Self::service_unavailable(err.to_string())
                }
                err => Self::internal_error(err.to_string()),
            }
        }
    }

    /// A failed poll means the device could not be read
    impl From<crate::polling::PollError> for ApiError {
        fn from(err: crate::polling::PollError) -> Self {
            Self::service_unavailable(err.to_string())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Duration;

        #[test]
        fn test_error_mapping() {
            let cases = [
                (
                    FanSyncError::InvalidInput("bad".to_string()),
                    StatusCode::BAD_REQUEST,
                ),
                (
                    FanSyncError::NoReply(Duration::from_secs(5)),
                    StatusCode::SERVICE_UNAVAILABLE,
                ),
                (
                    FanSyncError::ChecksumMismatch {
                        expected: 1,
                        actual: 2,
                    },
                    StatusCode::SERVICE_UNAVAILABLE,
                ),
                (
                    FanSyncError::Config("broken".to_string()),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            ];

            for (err, expected) in cases {
                assert_eq!(ApiError::from(err).status_code, expected);
            }
        }
    }
}

/// Helper macros for common responses
#[macro_export]
macro_rules! api_ok {
    ($data:expr) => {
        Ok(axum::Json(fansync_core::api::ApiResponse::success($data)))
    };
}

#[macro_export]
macro_rules! api_fail {
    ($message:expr) => {
        Err($crate::api::error::ApiError::bad_request($message))
    };
}
