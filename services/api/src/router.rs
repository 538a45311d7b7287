//! Axum Router Configuration
//!
//! Control routes, subscriber endpoints and the OpenAPI document.

use crate::{
    handlers,
    models::{
        ErrorResponse, RelayStatus, StartStreamPayload, StartStreamResponse, StopStreamPayload,
        StopStreamResponse,
    },
    relay::RelayState,
    state::AppState,
    subscribe,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_stream,
        handlers::stop_stream,
        handlers::list_streams,
        handlers::get_stream,
        handlers::health,
    ),
    components(
        schemas(StartStreamPayload, StartStreamResponse, StopStreamPayload, StopStreamResponse, RelayStatus, RelayState, ErrorResponse)
    ),
    tags(
        (name = "Call Relay API", description = "Start, stop and inspect live call relays")
    )
)]
pub struct ApiDoc;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/streams", get(handlers::list_streams))
        .route("/streams/start", post(handlers::start_stream))
        .route("/streams/stop", post(handlers::stop_stream))
        .route("/streams/{conversation_id}", get(handlers::get_stream))
        .route("/channels/{channel}/events", get(subscribe::channel_events))
        .route("/channels/{channel}/ws", get(subscribe::channel_socket))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
