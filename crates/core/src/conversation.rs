use serde::{Deserialize, Serialize};
use std::fmt;

/// Returned when a caller supplies an empty conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conversation id must not be empty")]
pub struct InvalidConversationId;

/// Opaque key of one upstream voice session.
///
/// The only validation is that the id is non-empty after trimming; the value
/// itself is kept exactly as supplied so that channel names stay a pure
/// function of what the caller sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidConversationId> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(InvalidConversationId);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the downstream fan-out channel for this conversation.
    ///
    /// Prefix concatenation only, so distinct ids always map to distinct
    /// channels under the same prefix.
    pub fn channel_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = InvalidConversationId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}
