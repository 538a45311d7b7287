//! Axum Handlers for the control routes
//!
//! Start, stop and inspect relays. `utoipa` attributes on each handler feed
//! the OpenAPI document served under `/swagger-ui`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::warn;

use crate::{
    models::{
        ErrorResponse, RelayStatus, StartStreamPayload, StartStreamResponse, StopStreamPayload,
        StopStreamResponse,
    },
    relay::ControlError,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!(%message, "Rejected control request.");
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::MissingConversationId => Self::BadRequest(err.to_string()),
        }
    }
}

/// Start relaying a conversation. Idempotent per conversation id.
#[utoipa::path(
    post,
    path = "/streams/start",
    request_body = StartStreamPayload,
    responses(
        (status = 200, description = "Relay started, or already running", body = StartStreamResponse),
        (status = 400, description = "conversationId missing or blank", body = ErrorResponse)
    )
)]
pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartStreamPayload>,
) -> Result<Json<StartStreamResponse>, ApiError> {
    let conversation_id = payload.conversation_id.unwrap_or_default();
    let outcome = state
        .control
        .start(&conversation_id, payload.session_id.as_deref())?;

    Ok(Json(StartStreamResponse {
        already_active: outcome.already_active,
        channel_name: outcome.channel_name,
    }))
}

/// Stop relaying a conversation. The terminal `ended` status follows on the
/// channel once teardown completes.
#[utoipa::path(
    post,
    path = "/streams/stop",
    request_body = StopStreamPayload,
    responses(
        (status = 200, description = "Relay was running and is now stopping", body = StopStreamResponse),
        (status = 404, description = "No relay for this conversation", body = StopStreamResponse),
        (status = 400, description = "conversationId missing or blank", body = ErrorResponse)
    )
)]
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StopStreamPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = payload.conversation_id.unwrap_or_default();
    let outcome = state.control.stop(&conversation_id)?;

    let status = if outcome.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(StopStreamResponse { found: outcome.found })))
}

/// List every live relay with its lifecycle state.
#[utoipa::path(
    get,
    path = "/streams",
    responses(
        (status = 200, description = "Live relays, oldest first", body = [RelayStatus])
    )
)]
pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<Vec<RelayStatus>> {
    let relays = state
        .control
        .list()
        .into_iter()
        .map(|snapshot| {
            let channel = state.control.channel_name(&snapshot.conversation_id);
            RelayStatus::from_snapshot(snapshot, channel)
        })
        .collect();
    Json(relays)
}

/// Get the relay for one conversation.
#[utoipa::path(
    get,
    path = "/streams/{conversation_id}",
    responses(
        (status = 200, description = "Relay details", body = RelayStatus),
        (status = 404, description = "No relay for this conversation", body = ErrorResponse)
    ),
    params(
        ("conversation_id" = String, Path, description = "Upstream conversation id")
    )
)]
pub async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<RelayStatus>, ApiError> {
    let snapshot = state.control.status(&conversation_id)?.ok_or_else(|| {
        ApiError::NotFound(format!(
            "No active relay for conversation '{}'",
            conversation_id
        ))
    })?;
    let channel = state.control.channel_name(&snapshot.conversation_id);
    Ok(Json(RelayStatus::from_snapshot(snapshot, channel)))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}
