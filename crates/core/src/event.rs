//! Relay event schema published to the downstream fan-out channel.
//!
//! Every event is a JSON object tagged by `type` and stamped with a wall-clock
//! `timestamp` in milliseconds. Timestamps exist for client-side display only;
//! ordering is carried by publish order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The two conversation roles tagged by the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    Operator,
}

impl Speaker {
    /// Upstream `"agent"` is the agent; every other role is the operator.
    pub fn from_role(role: Option<&str>) -> Self {
        match role {
            Some("agent") => Speaker::Agent,
            _ => Speaker::Operator,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Agent => write!(f, "agent"),
            Speaker::Operator => write!(f, "operator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connected,
    Active,
    /// Terminal: nothing follows on the channel for this conversation.
    Ended,
}

/// One transcript bubble.
///
/// The wire names stay `text_ja` / `text_en` because that is what existing
/// subscriber clients bind to, whatever language pair is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    #[serde(rename = "text_ja")]
    pub text_source: String,
    /// Always `None` for partial segments.
    #[serde(rename = "text_en")]
    pub text_translated: Option<String>,
    pub is_final: bool,
    pub timestamp: i64,
}

impl TranscriptEvent {
    pub fn partial(speaker: Speaker, text_source: String) -> Self {
        Self {
            speaker,
            text_source,
            text_translated: None,
            is_final: false,
            timestamp: now_millis(),
        }
    }

    pub fn finalized(speaker: Speaker, text_source: String, text_translated: String) -> Self {
        Self {
            speaker,
            text_source,
            text_translated: Some(text_translated),
            is_final: true,
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Status {
        status: StreamStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        timestamp: i64,
    },
    Transcript(TranscriptEvent),
    Audio {
        /// Base64 audio exactly as the upstream sent it.
        data: String,
        timestamp: i64,
    },
    Interruption {
        timestamp: i64,
    },
    AgentSpeaking {
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
}

impl RelayEvent {
    pub fn status(status: StreamStatus) -> Self {
        RelayEvent::Status {
            status,
            metadata: None,
            timestamp: now_millis(),
        }
    }

    pub fn status_with_metadata(status: StreamStatus, metadata: Value) -> Self {
        RelayEvent::Status {
            status,
            metadata: Some(metadata),
            timestamp: now_millis(),
        }
    }

    pub fn audio(data: String) -> Self {
        RelayEvent::Audio {
            data,
            timestamp: now_millis(),
        }
    }

    pub fn interruption() -> Self {
        RelayEvent::Interruption {
            timestamp: now_millis(),
        }
    }

    pub fn agent_speaking() -> Self {
        RelayEvent::AgentSpeaking {
            timestamp: now_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// The `type` tag, also used as the event name on named-event transports.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::Status { .. } => "status",
            RelayEvent::Transcript(_) => "transcript",
            RelayEvent::Audio { .. } => "audio",
            RelayEvent::Interruption { .. } => "interruption",
            RelayEvent::AgentSpeaking { .. } => "agent_speaking",
            RelayEvent::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            RelayEvent::Status { timestamp, .. }
            | RelayEvent::Audio { timestamp, .. }
            | RelayEvent::Interruption { timestamp }
            | RelayEvent::AgentSpeaking { timestamp }
            | RelayEvent::Error { timestamp, .. } => *timestamp,
            RelayEvent::Transcript(t) => t.timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayEvent::Status {
                status: StreamStatus::Ended,
                ..
            }
        )
    }
}

impl From<TranscriptEvent> for RelayEvent {
    fn from(event: TranscriptEvent) -> Self {
        RelayEvent::Transcript(event)
    }
}
