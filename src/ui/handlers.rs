//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::codec::NegotiationReport;
use crate::error::SessionError;
use crate::session::SessionStatus;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

fn trigger_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Stopped => StatusCode::CONFLICT,
        SessionError::ConnectionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Capture(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::DriverGone => StatusCode::GONE,
    }
}

/// Get session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionStatus>> {
    Json(ApiResponse::ok(state.session.status()))
}

/// Get the format negotiation report
pub async fn get_formats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<NegotiationReport>> {
    Json(ApiResponse::ok(state.session.negotiation().clone()))
}

/// Arm the gate and start recording
pub async fn record(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<SessionStatus>>) {
    match state.session.record().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.status()))),
        Err(e) => (trigger_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// Stop recording and close the channel
pub async fn stop(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<SessionStatus>>) {
    match state.session.stop().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(state.session.status()))),
        Err(e) => (trigger_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}
