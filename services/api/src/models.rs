//! Request and response bodies for the HTTP control surface.
//!
//! Bodies use camelCase on the wire to match the browser clients that drive
//! the relay. All of them derive `ToSchema` for the OpenAPI document.

use crate::relay::{RelaySnapshot, RelayState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamPayload {
    /// Missing or blank is rejected with 400.
    #[schema(example = "conv_01j8x4m2")]
    pub conversation_id: Option<String>,
    /// Opaque caller context, only used for log correlation.
    #[serde(default, alias = "contextId")]
    #[schema(example = "sess_7f3a")]
    pub session_id: Option<String>,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    pub already_active: bool,
    #[schema(example = "conversation-conv_01j8x4m2")]
    pub channel_name: String,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StopStreamPayload {
    #[schema(example = "conv_01j8x4m2")]
    pub conversation_id: Option<String>,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct StopStreamResponse {
    pub found: bool,
}

/// One live relay as reported by the status routes.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub conversation_id: String,
    pub channel_name: String,
    #[schema(value_type = String, example = "active")]
    pub state: RelayState,
    pub generation: u64,
}

impl RelayStatus {
    pub fn from_snapshot(snapshot: RelaySnapshot, channel_name: String) -> Self {
        Self {
            conversation_id: snapshot.conversation_id.to_string(),
            channel_name,
            state: snapshot.state,
            generation: snapshot.generation,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
