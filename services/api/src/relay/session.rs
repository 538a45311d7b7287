//! One relay session: a single task that owns an upstream link for one
//! conversation and republishes its normalized events.
//!
//! The session is the only writer of its lifecycle state apart from
//! `RelayRegistry::release`, which may flip an open session to `Closing`
//! before cancelling it. Frames are handled strictly one at a time, so
//! publish order on the channel is upstream order.

use super::{
    publisher::EventPublisher,
    registry::{RelayRegistry, RelayState, RelayTicket},
    upstream::{UpstreamConnector, UpstreamLink, UpstreamMessage},
};
use callrelay_core::{
    RelayEvent, Speaker, StreamStatus,
    event::TranscriptEvent,
    normalizer::{Normalized, Segment, SkipReason, normalize},
    translation::TranslationGateway,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// How long teardown waits for the transport to confirm the socket is gone.
const CLOSE_GRACE: Duration = Duration::from_secs(2);
const TERMINAL_PUBLISH_ATTEMPTS: u32 = 3;
const TERMINAL_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub const STREAM_PROCESSING_ERROR: &str = "Stream processing error";
pub const CONNECTION_ERROR: &str = "Connection error";
pub const CONNECTION_CLOSED: &str = "Connection closed unexpectedly";
pub const CONNECT_FAILED: &str = "Failed to connect to voice agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit stop through the registry.
    Stopped,
    /// The upstream ended the conversation with a normal close frame.
    UpstreamEnded,
    /// The upstream went away without a close frame, or closed with an
    /// error status.
    UpstreamClosed,
    TransportFailed(String),
    ConnectFailed(String),
}

impl CloseReason {
    /// The error subscribers see before `ended`, if any.
    fn error_message(&self) -> Option<&'static str> {
        match self {
            CloseReason::Stopped | CloseReason::UpstreamEnded => None,
            CloseReason::UpstreamClosed => Some(CONNECTION_CLOSED),
            CloseReason::TransportFailed(_) => Some(CONNECTION_ERROR),
            CloseReason::ConnectFailed(_) => Some(CONNECT_FAILED),
        }
    }
}

pub struct RelaySession {
    ticket: RelayTicket,
    channel: String,
    registry: Arc<RelayRegistry>,
    connector: Arc<dyn UpstreamConnector>,
    translator: Arc<TranslationGateway>,
    publisher: Arc<dyn EventPublisher>,
    /// Last partial text published per speaker.
    partials: HashMap<Speaker, String>,
}

impl RelaySession {
    pub fn new(
        ticket: RelayTicket,
        channel: String,
        registry: Arc<RelayRegistry>,
        connector: Arc<dyn UpstreamConnector>,
        translator: Arc<TranslationGateway>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            ticket,
            channel,
            registry,
            connector,
            translator,
            publisher,
            partials: HashMap::new(),
        }
    }

    /// Runs the session to completion. Always ends with `Status(ended)` on
    /// the channel and the registry slot reclaimed.
    pub async fn run(mut self) -> CloseReason {
        let reason = self.drive().await;
        self.finish(&reason).await;
        reason
    }

    async fn drive(&mut self) -> CloseReason {
        let cancel = self.ticket.cancel.clone();

        if let Some(predecessor) = self.ticket.predecessor.take() {
            debug!("Waiting for the previous relay on this conversation to drain.");
            tokio::select! {
                _ = cancel.cancelled() => return CloseReason::Stopped,
                _ = predecessor.cancelled() => {}
            }
        }

        let connector = self.connector.clone();
        let link = tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Stopped,
            result = connector.connect(&self.ticket.conversation_id) => match result {
                Ok(link) => link,
                Err(e) => {
                    error!(error = ?e, "Could not open upstream connection.");
                    return CloseReason::ConnectFailed(e.to_string());
                }
            },
        };
        let UpstreamLink {
            mut inbound,
            outbound,
        } = link;

        let reason = if self.transition(RelayState::Active) {
            info!("Relay active.");
            self.publish(RelayEvent::status(StreamStatus::Connected)).await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break CloseReason::Stopped,
                    message = inbound.recv() => match message {
                        Some(UpstreamMessage::Frame(raw)) => self.handle_frame(&raw, &outbound).await,
                        Some(closed @ UpstreamMessage::Closed { .. }) => {
                            if closed.is_normal_close() {
                                info!(?closed, "Upstream ended the conversation.");
                                break CloseReason::UpstreamEnded;
                            }
                            warn!(?closed, "Upstream closed the conversation with an error status.");
                            break CloseReason::UpstreamClosed;
                        }
                        Some(UpstreamMessage::TransportError(e)) => {
                            error!(error = %e, "Upstream transport failed.");
                            break CloseReason::TransportFailed(e);
                        }
                        None => {
                            if cancel.is_cancelled() {
                                break CloseReason::Stopped;
                            }
                            warn!("Upstream closed the conversation unexpectedly.");
                            break CloseReason::UpstreamClosed;
                        }
                    },
                }
            }
        } else {
            // Released while the handshake was in flight.
            CloseReason::Stopped
        };

        self.transition(RelayState::Closing);
        drop(outbound);
        let drained = tokio::time::timeout(CLOSE_GRACE, async {
            while inbound.recv().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Upstream did not confirm close in time; abandoning the socket.");
        }
        reason
    }

    async fn handle_frame(&mut self, raw: &str, outbound: &mpsc::Sender<String>) {
        match normalize(raw) {
            Ok(Normalized::Publish(event)) => {
                if matches!(event, RelayEvent::Interruption { .. }) {
                    self.partials.clear();
                }
                self.publish(event).await;
            }
            Ok(Normalized::Segment(segment)) => self.relay_segment(segment).await,
            Ok(Normalized::Reply(frame)) => {
                if outbound.send(frame).await.is_err() {
                    warn!("Upstream link closed before keepalive reply could be sent.");
                }
            }
            Ok(Normalized::Skip(SkipReason::EmptyText)) => trace!("Suppressed empty transcript."),
            Ok(Normalized::Skip(SkipReason::UnknownKind(kind))) => {
                debug!(%kind, "Ignoring upstream event kind.");
            }
            Err(e) => {
                warn!(error = %e, "Failed to process upstream frame.");
                self.publish(RelayEvent::error(STREAM_PROCESSING_ERROR)).await;
            }
        }
    }

    async fn relay_segment(&mut self, segment: Segment) {
        let Segment {
            speaker,
            text,
            is_final,
        } = segment;

        if is_final {
            self.partials.remove(&speaker);
            let translated = self.translator.translate(&text).await;
            self.publish(TranscriptEvent::finalized(speaker, text, translated).into())
                .await;
            return;
        }

        if self.partials.get(&speaker) == Some(&text) {
            trace!(%speaker, "Partial unchanged; not republishing.");
            return;
        }
        self.partials.insert(speaker, text.clone());
        self.publish(TranscriptEvent::partial(speaker, text).into()).await;
    }

    async fn finish(&mut self, reason: &CloseReason) {
        self.transition(RelayState::Closing);
        if let Some(message) = reason.error_message() {
            self.publish(RelayEvent::error(message)).await;
        }

        let id = self.ticket.conversation_id.clone();
        let generation = self.ticket.generation;
        self.registry.detach(&id, generation);
        self.transition(RelayState::Closed);
        self.publish_terminal().await;
        self.ticket.finished.cancel();
        self.registry.retire(&id, generation);
        info!(?reason, "Relay closed.");
    }

    /// Moves the lifecycle forward; returns false if `to` is not reachable
    /// from the current state.
    fn transition(&self, to: RelayState) -> bool {
        self.ticket.state.send_if_modified(|state| {
            let allowed = match (*state, to) {
                (RelayState::Connecting, RelayState::Active) => true,
                (RelayState::Connecting | RelayState::Active, RelayState::Closing) => true,
                (from, RelayState::Closed) => from != RelayState::Closed,
                _ => false,
            };
            if allowed {
                debug!(from = ?*state, to = ?to, "Relay state transition.");
                *state = to;
            }
            allowed
        })
    }

    /// Fire-and-forget: failures are logged and the stream moves on.
    async fn publish(&self, event: RelayEvent) {
        if let Err(e) = self.publisher.publish(&self.channel, &event).await {
            warn!(error = %e, kind = event.kind(), "Failed to publish relay event.");
        }
    }

    /// `ended` is the only signal that tells subscribers to stop waiting, so
    /// it is retried a few times before giving up.
    async fn publish_terminal(&self) {
        let event = RelayEvent::status(StreamStatus::Ended);
        for attempt in 1..=TERMINAL_PUBLISH_ATTEMPTS {
            match self.publisher.publish(&self.channel, &event).await {
                Ok(_) => return,
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to publish terminal status.");
                    if attempt < TERMINAL_PUBLISH_ATTEMPTS {
                        tokio::time::sleep(TERMINAL_RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }
        error!("Giving up on publishing terminal status.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{
        publisher::{BroadcastHub, PublishError},
        registry::Acquire,
    };
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use callrelay_core::{
        ConversationId,
        translation::{TRANSLATION_UNAVAILABLE, Translator, UnconfiguredTranslator},
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::broadcast;

    const CHANNEL: &str = "conversation-test";

    /// Test side of an in-memory upstream connection.
    struct FakeUpstream {
        frames: mpsc::Sender<UpstreamMessage>,
        replies: mpsc::UnboundedReceiver<String>,
    }

    impl FakeUpstream {
        async fn send(&self, frame: serde_json::Value) {
            self.frames
                .send(UpstreamMessage::Frame(frame.to_string()))
                .await
                .unwrap();
        }
    }

    /// Mirrors the real socket pump: closes inbound when either side goes away.
    fn fake_link() -> (UpstreamLink, FakeUpstream) {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(8);
        let (frames_tx, mut frames_rx) = mpsc::channel(64);
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frames_rx.recv() => match frame {
                        Some(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    reply = outbound_rx.recv() => match reply {
                        Some(reply) => {
                            let _ = replies_tx.send(reply);
                        }
                        None => break,
                    },
                }
            }
        });

        (
            UpstreamLink::new(inbound_rx, outbound_tx),
            FakeUpstream {
                frames: frames_tx,
                replies: replies_rx,
            },
        )
    }

    struct FakeConnector {
        links: Mutex<VecDeque<UpstreamLink>>,
    }

    #[async_trait]
    impl UpstreamConnector for FakeConnector {
        async fn connect(&self, _: &ConversationId) -> Result<UpstreamLink> {
            self.links
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    struct SuffixTranslator;

    #[async_trait]
    impl Translator for SuffixTranslator {
        async fn translate(&self, text: &str, _: &str, target: &str) -> Result<String> {
            Ok(format!("{} [{}]", text, target))
        }
    }

    /// Forwards to a hub but rejects the first `failures` publishes.
    struct FlakyPublisher {
        hub: Arc<BroadcastHub>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, channel: &str, event: &RelayEvent) -> Result<usize, PublishError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PublishError::Rejected {
                    channel: channel.to_string(),
                    reason: "unavailable".into(),
                });
            }
            self.hub.publish(channel, event).await
        }
    }

    struct Harness {
        registry: Arc<RelayRegistry>,
        events: broadcast::Receiver<Arc<RelayEvent>>,
        state: tokio::sync::watch::Receiver<RelayState>,
        cancel: tokio_util::sync::CancellationToken,
        task: tokio::task::JoinHandle<CloseReason>,
    }

    fn spawn_session(
        links: Vec<UpstreamLink>,
        translator: Arc<dyn Translator>,
        publisher: Option<Arc<dyn EventPublisher>>,
        hub: Arc<BroadcastHub>,
    ) -> Harness {
        let registry = Arc::new(RelayRegistry::new());
        let events = hub.subscribe(CHANNEL);
        let publisher: Arc<dyn EventPublisher> = match publisher {
            Some(publisher) => publisher,
            None => hub.clone(),
        };
        let ticket = match registry.acquire(&ConversationId::parse("conv_test").unwrap()) {
            Acquire::Created(ticket) => ticket,
            Acquire::AlreadyActive => unreachable!(),
        };
        let state = ticket.state.subscribe();
        let cancel = ticket.cancel.clone();
        let session = RelaySession::new(
            ticket,
            CHANNEL.to_string(),
            registry.clone(),
            Arc::new(FakeConnector {
                links: Mutex::new(links.into()),
            }),
            Arc::new(TranslationGateway::new(
                translator,
                "ja",
                "en",
                Duration::from_millis(200),
            )),
            publisher,
        );
        Harness {
            registry,
            events,
            state,
            cancel,
            task: tokio::spawn(session.run()),
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<Arc<RelayEvent>>) -> RelayEvent {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for relay event")
            .expect("channel closed");
        (*event).clone()
    }

    fn assert_status(event: &RelayEvent, expected: StreamStatus) {
        match event {
            RelayEvent::Status { status, .. } => assert_eq!(*status, expected),
            other => panic!("expected status {:?}, got {:?}", expected, other),
        }
    }

    fn transcript(event: RelayEvent) -> TranscriptEvent {
        match event {
            RelayEvent::Transcript(t) => t,
            other => panic!("expected transcript, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_translation_and_stop() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));

        assert_status(&next_event(&mut h.events).await, StreamStatus::Connected);
        assert_eq!(*h.state.borrow(), RelayState::Active);

        upstream
            .send(json!({"type": "transcript", "role": "agent", "text": "こんにちは", "is_final": false}))
            .await;
        let partial = transcript(next_event(&mut h.events).await);
        assert_eq!(partial.speaker, Speaker::Agent);
        assert!(!partial.is_final);
        assert_eq!(partial.text_translated, None);

        upstream
            .send(json!({"type": "transcript", "role": "agent", "text": "こんにちは、年金事務所です", "is_final": true}))
            .await;
        let fin = transcript(next_event(&mut h.events).await);
        assert!(fin.is_final);
        assert_eq!(fin.text_source, "こんにちは、年金事務所です");
        assert_eq!(fin.text_translated.as_deref(), Some("こんにちは、年金事務所です [en]"));

        h.registry.release(&ConversationId::parse("conv_test").unwrap());
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert_eq!(h.task.await.unwrap(), CloseReason::Stopped);
        assert_eq!(*h.state.borrow(), RelayState::Closed);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_ping_is_answered_upstream_only() {
        let (link, mut upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .send(json!({"type": "ping", "ping_event": {"event_id": 7}}))
            .await;
        let reply = tokio::time::timeout(Duration::from_secs(2), upstream.replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&reply).unwrap(),
            json!({"type": "pong", "event_id": 7})
        );

        upstream.send(json!({"type": "interruption"})).await;
        assert!(matches!(
            next_event(&mut h.events).await,
            RelayEvent::Interruption { .. }
        ));
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_reports_error_and_continues() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .frames
            .send(UpstreamMessage::Frame("{oops".into()))
            .await
            .unwrap();
        match next_event(&mut h.events).await {
            RelayEvent::Error { message, .. } => assert_eq!(message, STREAM_PROCESSING_ERROR),
            other => panic!("expected error, got {:?}", other),
        }

        upstream
            .send(json!({"type": "audio", "audio_event": {"audio_base_64": "AAAA"}}))
            .await;
        assert!(matches!(next_event(&mut h.events).await, RelayEvent::Audio { .. }));
        assert_eq!(*h.state.borrow(), RelayState::Active);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_and_duplicate_partials_are_not_published() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream.send(json!({"type": "transcript", "role": "agent", "text": "  ", "is_final": false})).await;
        upstream.send(json!({"type": "transcript", "role": "agent", "text": "", "is_final": true})).await;
        upstream.send(json!({"type": "transcript", "role": "agent", "text": "は", "is_final": false})).await;
        upstream.send(json!({"type": "transcript", "role": "agent", "text": "は", "is_final": false})).await;
        upstream.send(json!({"type": "transcript", "role": "user", "text": "は", "is_final": false})).await;
        upstream.send(json!({"type": "interruption"})).await;
        upstream.send(json!({"type": "transcript", "role": "agent", "text": "は", "is_final": false})).await;

        let first = transcript(next_event(&mut h.events).await);
        assert_eq!((first.speaker, first.text_source.as_str()), (Speaker::Agent, "は"));
        let second = transcript(next_event(&mut h.events).await);
        assert_eq!(second.speaker, Speaker::Operator);
        assert!(matches!(next_event(&mut h.events).await, RelayEvent::Interruption { .. }));
        // Interruption clears the remembered partial, so the same text is new again.
        let third = transcript(next_event(&mut h.events).await);
        assert_eq!(third.speaker, Speaker::Agent);

        h.cancel.cancel();
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_translation_failure_uses_sentinel() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(UnconfiguredTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream.send(json!({"type": "user_transcript", "user_transcript": "はい"})).await;
        let fin = transcript(next_event(&mut h.events).await);
        assert!(fin.is_final);
        assert_eq!(fin.speaker, Speaker::Operator);
        assert_eq!(fin.text_translated.as_deref(), Some(TRANSLATION_UNAVAILABLE));
        assert_eq!(*h.state.borrow(), RelayState::Active);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_upstream_close() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        drop(upstream);
        match next_event(&mut h.events).await {
            RelayEvent::Error { message, .. } => assert_eq!(message, CONNECTION_CLOSED),
            other => panic!("expected error, got {:?}", other),
        }
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert!(h.registry.is_empty());
        assert_eq!(h.task.await.unwrap(), CloseReason::UpstreamClosed);
    }

    #[tokio::test]
    async fn test_normal_close_frame_ends_without_error() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .frames
            .send(UpstreamMessage::Closed {
                code: Some(1000),
                reason: "conversation ended".into(),
            })
            .await
            .unwrap();
        drop(upstream);

        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert_eq!(h.task.await.unwrap(), CloseReason::UpstreamEnded);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_error_close_frame_reports_error() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .frames
            .send(UpstreamMessage::Closed {
                code: Some(1011),
                reason: "internal failure".into(),
            })
            .await
            .unwrap();

        match next_event(&mut h.events).await {
            RelayEvent::Error { message, .. } => assert_eq!(message, CONNECTION_CLOSED),
            other => panic!("expected error, got {:?}", other),
        }
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert_eq!(h.task.await.unwrap(), CloseReason::UpstreamClosed);
    }

    /// Sleeps before answering, to hold a final segment in translation.
    struct SlowTranslator(Duration);

    #[async_trait]
    impl Translator for SlowTranslator {
        async fn translate(&self, text: &str, _: &str, _: &str) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok(format!("{} (slow)", text))
        }
    }

    async fn final_then_audio(translator: SlowTranslator) -> (TranscriptEvent, Harness) {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(translator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .send(json!({"type": "transcript", "role": "agent", "text": "少々お待ちください", "is_final": true}))
            .await;
        upstream
            .send(json!({"type": "audio", "audio_event": {"audio_base_64": "AAAA"}}))
            .await;

        let fin = transcript(next_event(&mut h.events).await);
        assert!(fin.is_final);
        assert!(matches!(next_event(&mut h.events).await, RelayEvent::Audio { .. }));
        assert_eq!(*h.state.borrow(), RelayState::Active);
        (fin, h)
    }

    #[tokio::test]
    async fn test_slow_translation_keeps_final_ahead_of_later_events() {
        let (fin, h) = final_then_audio(SlowTranslator(Duration::from_millis(80))).await;
        assert_eq!(fin.text_translated.as_deref(), Some("少々お待ちください (slow)"));
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_translation_keeps_final_ahead_of_later_events() {
        let (fin, h) = final_then_audio(SlowTranslator(Duration::from_millis(600))).await;
        assert_eq!(fin.text_translated.as_deref(), Some(TRANSLATION_UNAVAILABLE));
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));
        next_event(&mut h.events).await;

        upstream
            .frames
            .send(UpstreamMessage::TransportError("reset by peer".into()))
            .await
            .unwrap();
        match next_event(&mut h.events).await {
            RelayEvent::Error { message, .. } => assert_eq!(message, CONNECTION_ERROR),
            other => panic!("expected error, got {:?}", other),
        }
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert_eq!(
            h.task.await.unwrap(),
            CloseReason::TransportFailed("reset by peer".into())
        );
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_ended() {
        let mut h = spawn_session(vec![], Arc::new(SuffixTranslator), None, Arc::new(BroadcastHub::new(64)));

        match next_event(&mut h.events).await {
            RelayEvent::Error { message, .. } => assert_eq!(message, CONNECT_FAILED),
            other => panic!("expected error, got {:?}", other),
        }
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        assert!(matches!(h.task.await.unwrap(), CloseReason::ConnectFailed(_)));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failures_do_not_stop_the_session() {
        let hub = Arc::new(BroadcastHub::new(64));
        let flaky = Arc::new(FlakyPublisher {
            hub: hub.clone(),
            failures: AtomicUsize::new(1),
        });
        let (link, upstream) = fake_link();
        let mut h = spawn_session(vec![link], Arc::new(SuffixTranslator), Some(flaky.clone() as Arc<dyn EventPublisher>), hub);

        // `connected` is lost; the session keeps going.
        upstream.send(json!({"type": "agent_response"})).await;
        assert!(matches!(
            next_event(&mut h.events).await,
            RelayEvent::AgentSpeaking { .. }
        ));

        // Two failed attempts on `ended`, then it gets through.
        flaky.failures.store(2, Ordering::SeqCst);
        h.cancel.cancel();
        assert_status(&next_event(&mut h.events).await, StreamStatus::Ended);
        h.task.await.unwrap();
    }
}
