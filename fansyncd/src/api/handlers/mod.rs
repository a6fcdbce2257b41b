//! API request handlers for the FanSync daemon REST API.
//!
//! # Handler Modules
//!
//! - [`info`] - Root endpoint
//! - [`status`] - Latest known state, fresh reads, and poll triggers
//! - [`fan`] - Speed, direction, and raw state updates
//! - [`light`] - Downlight and sleep timer
//!
//! # API Structure
//!
//! All handlers follow a consistent pattern:
//! - Accept `State<AppState>` for accessing shared application state
//! - Return `Result<Json<ApiResponse<T>>, ApiError>` for uniform responses
//! - Use `api_ok!()` and `api_fail!()` macros for response construction
//! - Log operations using the `tracing` crate
//!
//! Link and protocol failures surface as `503 Service Unavailable`.

pub mod fan;
pub mod info;
pub mod light;
pub mod status;
