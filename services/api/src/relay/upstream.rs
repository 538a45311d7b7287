//! Connection to the upstream voice-agent service.
//!
//! A connector hands the session an [`UpstreamLink`]: a channel of inbound
//! frames and a sender for outbound frames. The socket itself lives in a
//! separate pump task, so the session sees upstream traffic as an ordinary
//! message queue. Dropping the outbound sender asks the pump to send a close
//! frame and exit; the inbound channel closes once the socket is gone.

use crate::config::UpstreamConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use callrelay_core::ConversationId;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, info, warn};

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 32;

/// What the pump delivers to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamMessage {
    /// One JSON text frame.
    Frame(String),
    /// The transport failed; the channel closes right after this.
    TransportError(String),
    /// The upstream sent a close frame. `code` is absent when the frame
    /// carried no status. The channel closes right after this.
    Closed { code: Option<u16>, reason: String },
}

impl UpstreamMessage {
    /// A close frame with no status, 1000 (normal) or 1001 (going away).
    pub fn is_normal_close(&self) -> bool {
        matches!(
            self,
            UpstreamMessage::Closed {
                code: None | Some(1000) | Some(1001),
                ..
            }
        )
    }
}

pub struct UpstreamLink {
    pub inbound: mpsc::Receiver<UpstreamMessage>,
    pub outbound: mpsc::Sender<String>,
}

impl UpstreamLink {
    /// Builds a link from raw channel halves; useful for in-memory transports.
    pub fn new(inbound: mpsc::Receiver<UpstreamMessage>, outbound: mpsc::Sender<String>) -> Self {
        Self { inbound, outbound }
    }
}

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Opens one upstream conversation. Returns once the handshake is done.
    async fn connect(&self, conversation_id: &ConversationId) -> Result<UpstreamLink>;
}

/// ElevenLabs Conversational AI over WebSocket.
pub struct ElevenLabsConnector {
    config: UpstreamConfig,
}

impl ElevenLabsConnector {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        format!("{}{}agent_id={}", self.config.url, separator, self.config.agent_id)
    }
}

#[async_trait]
impl UpstreamConnector for ElevenLabsConnector {
    async fn connect(&self, conversation_id: &ConversationId) -> Result<UpstreamLink> {
        let mut request = self.endpoint().into_client_request()?;
        request
            .headers_mut()
            .insert("xi-api-key", self.config.api_key.parse()?);

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .context("Timed out connecting to the voice agent")?
            .context("Failed to connect to the voice agent WebSocket")?;
        info!(%conversation_id, "Connected to upstream voice agent.");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(pump(ws_stream, inbound_tx, outbound_rx).in_current_span());

        Ok(UpstreamLink::new(inbound_rx, outbound_tx))
    }
}

/// Shuttles frames between the socket and the session's channels.
async fn pump<S>(
    ws: S,
    inbound: mpsc::Sender<UpstreamMessage>,
    mut outbound: mpsc::Receiver<String>,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if inbound.send(UpstreamMessage::Frame(text.as_str().to_owned())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if inbound.send(UpstreamMessage::Frame(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame from upstream"),
                },
                Some(Ok(WsMessage::Close(close_frame))) => {
                    info!(?close_frame, "Upstream closed the connection.");
                    let (code, reason) = match close_frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    let _ = inbound.send(UpstreamMessage::Closed { code, reason }).await;
                    break;
                }
                // Protocol-level ping/pong is answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(UpstreamMessage::TransportError(e.to_string())).await;
                    break;
                }
                None => break,
            },
            reply = outbound.recv() => match reply {
                Some(text) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                        let _ = inbound.send(UpstreamMessage::TransportError(e.to_string())).await;
                        break;
                    }
                }
                None => {
                    debug!("Session released the upstream link; closing socket.");
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
        }
    }
    let _ = ws_tx.close().await;
}
