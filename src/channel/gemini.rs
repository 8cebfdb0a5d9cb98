//! # Gemini Live WebSocket Transport
//!
//! Implements `LiveChannel` over the Gemini Live `BidiGenerateContent` socket.
//!
//! ## Protocol:
//! 1. **Connect**: open the WebSocket with the API key as a query parameter
//! 2. **Setup**: send the `setup` frame (model, voice, instruction, tools)
//! 3. **Handshake**: wait for a frame carrying `setupComplete`
//! 4. **Streaming**: a reader task turns server frames into `ChannelEvent`s,
//!    a writer task turns `OutboundMessage`s into client frames
//! 5. **Shutdown**: cancelling the token stops both tasks and closes the socket
//!
//! Server frames arrive as text or as binary frames holding UTF-8 JSON; both
//! are accepted.

use crate::channel::wire::{ClientMessage, ServerMessage};
use crate::channel::{
    ChannelConnection, ChannelEvent, LiveChannel, OutboundHandle, OutboundMessage, SessionSetup,
};
use crate::config::LiveConfig;
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Live channel backed by the Gemini WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct GeminiLiveChannel {
    endpoint: String,
    api_key: String,
    handshake_timeout: Duration,
}

impl GeminiLiveChannel {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Endpoint with the key attached, if one is configured.
    fn url(&self) -> String {
        if self.api_key.is_empty() {
            return self.endpoint.clone();
        }
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

#[async_trait]
impl LiveChannel for GeminiLiveChannel {
    async fn open(&self, setup: SessionSetup) -> SessionResult<ChannelConnection> {
        info!(endpoint = %self.endpoint, model = %setup.model, "Opening live channel");

        let (ws, _response) = connect_async(self.url().as_str())
            .await
            .map_err(|e| SessionError::ConnectFailure(format!("WebSocket connect failed: {}", e)))?;
        let (mut sink, mut source) = ws.split();

        let frame = ClientMessage::setup(&setup)
            .to_json()
            .map_err(|e| SessionError::ConnectFailure(format!("Cannot encode setup: {}", e)))?;
        sink.send(Message::Text(frame))
            .await
            .map_err(|e| SessionError::ConnectFailure(format!("Cannot send setup: {}", e)))?;

        match tokio::time::timeout(self.handshake_timeout, wait_for_setup(&mut source)).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = sink.close().await;
                return Err(SessionError::ConnectFailure(format!(
                    "No setupComplete within {:?}",
                    self.handshake_timeout
                )));
            }
        }
        info!("Live channel handshake complete");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(read_loop(source, event_tx.clone(), shutdown.clone()));
        tokio::spawn(write_loop(sink, outbound_rx, event_tx, shutdown.clone()));

        Ok(ChannelConnection {
            inbound: event_rx,
            outbound: OutboundHandle::new(outbound_tx),
            shutdown,
        })
    }
}

/// Consume frames until the server confirms the setup.
async fn wait_for_setup(source: &mut WsSource) -> SessionResult<()> {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(close)) => {
                let reason = close.map(|c| c.reason.to_string()).unwrap_or_default();
                return Err(SessionError::ConnectFailure(format!(
                    "Channel closed during handshake: {}",
                    reason
                )));
            }
            Ok(_) => continue,
            Err(e) => {
                return Err(SessionError::ConnectFailure(format!("Handshake failed: {}", e)));
            }
        };

        match ServerMessage::parse(&text) {
            Ok(message) if message.is_setup_complete() => return Ok(()),
            Ok(_) => debug!("Ignoring frame received before setupComplete"),
            Err(e) => warn!("Unparseable frame during handshake: {}", e),
        }
    }

    Err(SessionError::ConnectFailure(
        "Channel ended before setupComplete".to_string(),
    ))
}

/// Turn server frames into channel events until shutdown or end of stream.
async fn read_loop(
    mut source: WsSource,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => forward_frame(&text, &events),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => forward_frame(&text, &events),
                Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
            },
            Some(Ok(Message::Close(close))) => {
                let reason = close.map(|c| c.reason.to_string());
                info!(reason = ?reason, "Live channel closed by server");
                let _ = events.send(ChannelEvent::Closed(reason));
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("Live channel read error: {}", e);
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                break;
            }
            None => {
                let _ = events.send(ChannelEvent::Closed(None));
                break;
            }
        }
    }
    debug!("Live channel reader stopped");
}

fn forward_frame(text: &str, events: &mpsc::UnboundedSender<ChannelEvent>) {
    match ServerMessage::parse(text) {
        Ok(message) => {
            let inbound = message.into_inbound();
            if !inbound.is_empty() {
                let _ = events.send(ChannelEvent::Message(inbound));
            }
        }
        Err(e) => warn!("Skipping unparseable server frame: {}", e),
    }
}

/// Serialize outbound messages onto the socket in order.
async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else { break };

        let frame = match ClientMessage::from_outbound(message).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Cannot encode outbound frame: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(frame)).await {
            warn!("Live channel write error: {}", e);
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Socket close after writer stop: {}", e);
    }
    debug!("Live channel writer stopped");
}
