//! Start/stop entry points. Both return as soon as the registry has been
//! updated; connecting and teardown happen on the session task.

use super::{
    publisher::EventPublisher,
    registry::{Acquire, RelayRegistry, RelaySnapshot, Release},
    session::RelaySession,
    upstream::UpstreamConnector,
};
use callrelay_core::{ConversationId, InvalidConversationId, translation::TranslationGateway};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("conversationId required")]
    MissingConversationId,
}

impl From<InvalidConversationId> for ControlError {
    fn from(_: InvalidConversationId) -> Self {
        ControlError::MissingConversationId
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub already_active: bool,
    pub channel_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub found: bool,
}

pub struct RelayControl {
    registry: Arc<RelayRegistry>,
    connector: Arc<dyn UpstreamConnector>,
    translator: Arc<TranslationGateway>,
    publisher: Arc<dyn EventPublisher>,
    channel_prefix: String,
}

impl RelayControl {
    pub fn new(
        registry: Arc<RelayRegistry>,
        connector: Arc<dyn UpstreamConnector>,
        translator: Arc<TranslationGateway>,
        publisher: Arc<dyn EventPublisher>,
        channel_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            connector,
            translator,
            publisher,
            channel_prefix: channel_prefix.into(),
        }
    }

    pub fn channel_name(&self, id: &ConversationId) -> String {
        id.channel_name(&self.channel_prefix)
    }

    /// Starts relaying `conversation_id` unless a relay for it is already
    /// running. Idempotent: a duplicate start reports `already_active` and
    /// leaves the running session alone.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        conversation_id: &str,
        context_id: Option<&str>,
    ) -> Result<StartOutcome, ControlError> {
        let id = ConversationId::parse(conversation_id)?;
        let channel_name = self.channel_name(&id);

        let ticket = match self.registry.acquire(&id) {
            Acquire::AlreadyActive => {
                info!(conversation_id = %id, "Relay already active; start ignored.");
                return Ok(StartOutcome {
                    already_active: true,
                    channel_name,
                });
            }
            Acquire::Created(ticket) => ticket,
        };

        let span = info_span!(
            "relay",
            conversation_id = %id,
            context_id = context_id.unwrap_or("-"),
            generation = ticket.generation,
        );
        let session = RelaySession::new(
            ticket,
            channel_name.clone(),
            self.registry.clone(),
            self.connector.clone(),
            self.translator.clone(),
            self.publisher.clone(),
        );
        tokio::spawn(session.run().instrument(span));
        info!(conversation_id = %id, channel = %channel_name, "Relay started.");

        Ok(StartOutcome {
            already_active: false,
            channel_name,
        })
    }

    /// Signals the relay for `conversation_id` to close. The entry is gone
    /// from the registry by the time this returns; `Status(ended)` follows
    /// on the channel once teardown completes.
    pub fn stop(&self, conversation_id: &str) -> Result<StopOutcome, ControlError> {
        let id = ConversationId::parse(conversation_id)?;
        let found = self.registry.release(&id) == Release::Removed;
        if found {
            info!(conversation_id = %id, "Relay stop requested.");
        } else {
            info!(conversation_id = %id, "No active relay to stop.");
        }
        Ok(StopOutcome { found })
    }

    pub fn list(&self) -> Vec<RelaySnapshot> {
        self.registry.snapshot()
    }

    pub fn status(&self, conversation_id: &str) -> Result<Option<RelaySnapshot>, ControlError> {
        let id = ConversationId::parse(conversation_id)?;
        Ok(self
            .registry
            .snapshot()
            .into_iter()
            .find(|relay| relay.conversation_id == id))
    }

    /// Stops every relay and returns the signals that fire once each has
    /// published its terminal status.
    pub fn shutdown(&self) -> Vec<CancellationToken> {
        let released = self.registry.release_all();
        info!(released, "Stopping all relays.");
        self.registry.finished_signals()
    }
}
