//! Classification of raw upstream frames.
//!
//! The upstream voice-agent service speaks a loosely-typed JSON vocabulary
//! whose payloads move between top-level fields and per-kind `*_event`
//! objects depending on version. Everything here reads from a
//! `serde_json::Value` so that optional or relocated fields degrade to
//! "absent" instead of failing the whole frame.

use crate::event::{RelayEvent, Speaker, StreamStatus};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` field")]
    MissingType,
    #[error("audio frame has no base64 payload")]
    MissingAudio,
}

/// A transcript segment before translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub speaker: Speaker,
    /// Kept as sent; contains at least one non-whitespace character.
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyText,
    UnknownKind(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Ready to publish downstream as-is.
    Publish(RelayEvent),
    /// Transcript text; finalized segments must be translated before publish.
    Segment(Segment),
    /// A text frame to send back on the upstream connection.
    Reply(String),
    /// Nothing to publish.
    Skip(SkipReason),
}

/// Classifies one upstream text frame.
pub fn normalize(raw: &str) -> Result<Normalized, NormalizeError> {
    let message: Value = serde_json::from_str(raw)?;
    if !message.is_object() {
        return Err(NormalizeError::NotAnObject);
    }
    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingType)?;

    let normalized = match kind {
        "audio" => {
            let data = message
                .pointer("/audio_event/audio_base_64")
                .and_then(Value::as_str)
                .or_else(|| message.get("audio_base_64").and_then(Value::as_str))
                .ok_or(NormalizeError::MissingAudio)?;
            Normalized::Publish(RelayEvent::audio(data.to_string()))
        }
        "transcript" => {
            let event = message.get("transcript_event").unwrap_or(&message);
            let speaker = Speaker::from_role(event.get("role").and_then(Value::as_str));
            let text = first_text(event, &["transcript", "text"]);
            // Only an explicit `false` marks a partial segment.
            let is_final = !matches!(event.get("is_final"), Some(Value::Bool(false)));
            segment(speaker, text, is_final)
        }
        "user_transcript" => {
            let text = message
                .get("user_transcript")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .or_else(|| {
                    message
                        .pointer("/user_transcription_event/user_transcript")
                        .and_then(Value::as_str)
                });
            segment(Speaker::Operator, text, true)
        }
        "interruption" => Normalized::Publish(RelayEvent::interruption()),
        "ping" => {
            let event_id = message
                .pointer("/ping_event/event_id")
                .or_else(|| message.get("event_id"));
            Normalized::Reply(pong_frame(event_id))
        }
        "conversation_initiation_metadata" => Normalized::Publish(
            RelayEvent::status_with_metadata(StreamStatus::Active, message.clone()),
        ),
        "agent_response" => Normalized::Publish(RelayEvent::agent_speaking()),
        other => Normalized::Skip(SkipReason::UnknownKind(other.to_string())),
    };
    Ok(normalized)
}

/// The keepalive answer, echoing the ping's event id when it had one.
pub fn pong_frame(event_id: Option<&Value>) -> String {
    match event_id {
        Some(id) if !id.is_null() => json!({ "type": "pong", "event_id": id }).to_string(),
        _ => json!({ "type": "pong" }).to_string(),
    }
}

fn first_text<'a>(event: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| event.get(*key).and_then(Value::as_str))
        .find(|text| !text.is_empty())
}

fn segment(speaker: Speaker, text: Option<&str>, is_final: bool) -> Normalized {
    match text {
        Some(text) if !text.trim().is_empty() => Normalized::Segment(Segment {
            speaker,
            text: text.to_string(),
            is_final,
        }),
        _ => Normalized::Skip(SkipReason::EmptyText),
    }
}
