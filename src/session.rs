// Live session connector
// Owns the single websocket per identity, turns inbound frames into typed
// events and outgoing send intents into frames.

use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::models::{DeliveryStatus, Identity, Message, OutgoingFrame};

/// Enum for representing the live channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One parsed, normalized inbound frame.
    Message(Message),
    State {
        identity: Identity,
        state: ConnectionState,
    },
}

/// Where session events are delivered. Unbounded so delivery never awaits
/// while the handler slot is locked.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Reasons an inbound frame is dropped instead of surfaced.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not JSON: {0}")]
    NotJson(#[source] serde_json::Error),

    #[error("backend reported an error: {0}")]
    Backend(String),

    #[error("frame is not a message: {0}")]
    NotAMessage(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    id: i64,
    from: Option<Identity>,
    to: Option<Identity>,
    content: String,
    status: DeliveryStatus,
    timestamp: String,
}

/// Parse one inbound text frame received on `identity`'s channel.
///
/// The backend omits `from` on its confirmation to the sender and `to` on
/// delivery to the recipient; both default to the owning identity.
pub fn parse_frame(identity: &str, text: &str) -> std::result::Result<Message, FrameError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(FrameError::NotJson)?;

    if let Some(err) = value.get("error").filter(|err| !err.is_null()) {
        let detail = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(FrameError::Backend(detail));
    }

    let frame: InboundFrame = serde_json::from_value(value).map_err(FrameError::NotAMessage)?;

    Ok(Message {
        id: frame.id,
        from: frame.from.unwrap_or_else(|| identity.to_string()),
        to: frame.to.unwrap_or_else(|| identity.to_string()),
        content: frame.content,
        status: frame.status,
        timestamp: frame.timestamp,
    })
}

// Handler slots are only held for a synchronous send, so a poisoned lock
// still holds a consistent value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(handler: &Mutex<Option<EventSink>>, event: SessionEvent) {
    let guard = lock(handler);
    if let Some(sink) = guard.as_ref() {
        if sink.send(event).is_err() {
            debug!("Session event receiver is gone, dropping event");
        }
    }
}

struct Channel {
    identity: Identity,
    handler: Arc<Mutex<Option<EventSink>>>,
    state: Arc<Mutex<ConnectionState>>,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }
}

/// At most one live channel exists per connector, owned by one identity.
pub struct SessionConnector {
    config: ClientConfig,
    sink: Option<EventSink>,
    channel: Option<Channel>,
}

impl SessionConnector {
    pub fn new(config: ClientConfig) -> Self {
        SessionConnector {
            config,
            sink: None,
            channel: None,
        }
    }

    /// Register where events go. Replaces any previous sink, including on an
    /// already open channel.
    pub fn on_event(&mut self, sink: EventSink) {
        if let Some(channel) = &self.channel {
            *lock(&channel.handler) = Some(sink.clone());
        }
        self.sink = Some(sink);
    }

    pub fn state(&self) -> ConnectionState {
        self.channel
            .as_ref()
            .map(Channel::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn identity(&self) -> Option<&str> {
        self.channel.as_ref().map(|channel| channel.identity.as_str())
    }

    /// Open the live channel for `identity`.
    ///
    /// A no-op when that identity's channel is already up. A channel owned by
    /// anyone else is torn down first.
    pub async fn open(&mut self, identity: &str) -> Result<()> {
        if let Some(channel) = &self.channel {
            if channel.identity == identity && channel.state() != ConnectionState::Disconnected {
                debug!("Live channel for {} already open", identity);
                return Ok(());
            }
        }
        self.close();

        let handler = Arc::new(Mutex::new(self.sink.clone()));
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        dispatch(
            &handler,
            SessionEvent::State {
                identity: identity.to_string(),
                state: ConnectionState::Connecting,
            },
        );

        let url = self.config.chat_socket_url(identity);
        info!("Opening live channel for {} at {}", identity, url);

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                error!("Failed to open live channel for {}: {}", identity, e);
                *lock(&state) = ConnectionState::Disconnected;
                dispatch(
                    &handler,
                    SessionEvent::State {
                        identity: identity.to_string(),
                        state: ConnectionState::Disconnected,
                    },
                );
                return Err(e.into());
            }
        };

        let (mut write, read) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(frame).await {
                    warn!("Failed to write to live channel: {}", e);
                    break;
                }
            }
            // Sender dropped: the connector closed this channel
            let _ = write.close().await;
        });

        *lock(&state) = ConnectionState::Connected;
        dispatch(
            &handler,
            SessionEvent::State {
                identity: identity.to_string(),
                state: ConnectionState::Connected,
            },
        );
        info!("Live channel for {} connected", identity);

        let reader = tokio::spawn(read_frames(
            identity.to_string(),
            read,
            handler.clone(),
            state.clone(),
        ));

        self.channel = Some(Channel {
            identity: identity.to_string(),
            handler,
            state,
            outbound: Some(outbound),
            reader: Some(reader),
        });
        Ok(())
    }

    /// Queue `content` for `to` on the live channel.
    ///
    /// Blank content and a channel that is not connected are silently
    /// ignored; delivery is confirmed later by an inbound event, if at all.
    pub fn send(&self, to: &str, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            debug!("Ignoring blank message to {}", to);
            return Ok(());
        }

        let channel = match &self.channel {
            Some(channel) if channel.state() == ConnectionState::Connected => channel,
            _ => {
                debug!("Live channel not connected, dropping message to {}", to);
                return Ok(());
            }
        };

        let frame = OutgoingFrame {
            to: to.to_string(),
            content: content.to_string(),
        };
        let text = serde_json::to_string(&frame)?;

        if let Some(outbound) = &channel.outbound {
            if outbound.send(WsMessage::Text(text.into())).is_err() {
                debug!("Live channel writer for {} has stopped", channel.identity);
            }
        }
        Ok(())
    }

    /// Detach the handler, then close the channel. Safe without an open
    /// channel.
    pub fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };

        *lock(&channel.handler) = None;
        *lock(&channel.state) = ConnectionState::Disconnected;

        if let Some(reader) = channel.reader.take() {
            reader.abort();
        }
        // Dropping the sender lets the writer send the close frame
        channel.outbound.take();

        info!("Closed live channel for {}", channel.identity);
    }
}

impl Drop for SessionConnector {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_frames<S>(
    identity: Identity,
    mut read: S,
    handler: Arc<Mutex<Option<EventSink>>>,
    state: Arc<Mutex<ConnectionState>>,
) where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match parse_frame(&identity, text.as_str()) {
                Ok(message) => dispatch(&handler, SessionEvent::Message(message)),
                Err(e) => debug!("Dropping frame on {}'s channel: {}", identity, e),
            },
            Ok(WsMessage::Close(reason)) => {
                info!("Server closed live channel for {}: {:?}", identity, reason);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Live channel for {} failed: {}", identity, e);
                break;
            }
        }
    }

    *lock(&state) = ConnectionState::Disconnected;
    dispatch(
        &handler,
        SessionEvent::State {
            identity,
            state: ConnectionState::Disconnected,
        },
    );
}
