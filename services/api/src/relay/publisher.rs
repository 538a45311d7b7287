//! Downstream fan-out.
//!
//! Relay sessions publish through [`EventPublisher`] without knowing who is
//! listening. [`BroadcastHub`] is the in-process implementation: one
//! `tokio::sync::broadcast` channel per channel name, created on first
//! subscription, with every subscriber receiving every event independently.

use async_trait::async_trait;
use callrelay_core::RelayEvent;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish to channel '{channel}' failed: {reason}")]
    Rejected { channel: String, reason: String },
}

/// An append-only broadcast target keyed by channel name.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event; returns how many subscribers it reached.
    async fn publish(&self, channel: &str, event: &RelayEvent) -> Result<usize, PublishError>;
}

pub struct BroadcastHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Arc<RelayEvent>>>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Starts receiving everything published to `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Arc<RelayEvent>> {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Drops channels nobody is subscribed to any more.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }
}

#[async_trait]
impl EventPublisher for BroadcastHub {
    async fn publish(&self, channel: &str, event: &RelayEvent) -> Result<usize, PublishError> {
        let sender = self.channels.lock().get(channel).cloned();
        let delivered = match sender {
            // A send error only means every receiver has gone away.
            Some(tx) => tx.send(Arc::new(event.clone())).unwrap_or(0),
            None => 0,
        };
        trace!(channel, kind = event.kind(), delivered, "Published relay event");
        Ok(delivered)
    }
}
