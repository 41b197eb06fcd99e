//! Reliable, ordered control channel.
//!
//! # Layers (for beginners)
//!
//! A control connection is a reliable byte pipe (TCP, or a WebSocket over
//! TCP) that carries whole control messages one after another.  It is split
//! into two halves so that one task can write while another reads:
//!
//! - [`ControlSender`] stamps each outgoing message with a sequence number
//!   and each input event with the next `event_id`, then writes it.
//! - [`ControlReceiver`] yields incoming messages strictly in the order they
//!   were sent and refuses events whose ids go backwards.
//!
//! Both halves share a [`ChannelState`].  Once the connection is lost the
//! state flips to [`ChannelState::Disconnected`] and every further send fails
//! immediately with [`ChannelError::Disconnected`].  Events are never queued
//! for a later reconnect: input that arrives while disconnected is dropped at
//! the source.

pub mod stream;
pub mod ws;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use srvnc_core::protocol::codec::{decode_message, encode_message_now, ProtocolError};
use srvnc_core::protocol::messages::{ControlMessage, DisconnectReason};
use srvnc_core::protocol::SequenceCounter;
use srvnc_core::{ControlEvent, EventId};

pub use stream::{connect_tcp, StreamTransport};
pub use ws::{accept_ws, connect_ws, WsTransport};

/// Errors reported by the control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is closed; nothing was sent.
    #[error("control channel is disconnected")]
    Disconnected,

    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("control protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer sent an event id that is not larger than the previous one.
    #[error("event {got} arrived after event {last}")]
    OutOfOrder { last: EventId, got: EventId },
}

/// Connection state shared by both halves of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Disconnected,
}

/// Which reliable transport carries the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlTransportKind {
    #[default]
    Tcp,
    #[serde(alias = "ws")]
    WebSocket,
}

impl std::fmt::Display for ControlTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlTransportKind::Tcp => f.write_str("tcp"),
            ControlTransportKind::WebSocket => f.write_str("websocket"),
        }
    }
}

impl std::str::FromStr for ControlTransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ControlTransportKind::Tcp),
            "websocket" | "ws" => Ok(ControlTransportKind::WebSocket),
            other => Err(format!("unknown control transport '{other}' (expected tcp or websocket)")),
        }
    }
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// Writes whole control frames (header + payload) to a reliable stream.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError>;

    /// Flushes and closes the write direction.
    async fn shutdown(&mut self) -> Result<(), ChannelError>;
}

/// Reads whole control frames from a reliable stream.
#[async_trait]
pub trait FrameReader: Send {
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;
}

/// A connected, framed, reliable byte stream that can be split into halves.
pub trait ControlTransport {
    type Reader: FrameReader + 'static;
    type Writer: FrameWriter + 'static;

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// Splits a transport into the two channel halves.
pub fn open<T: ControlTransport>(transport: T) -> (ControlSender, ControlReceiver) {
    let peer = transport.peer_addr();
    let (reader, writer) = transport.into_split();
    control_channel(reader, writer, peer)
}

/// Builds a channel from already-split halves.
pub fn control_channel<R, W>(
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
) -> (ControlSender, ControlReceiver)
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (state, _) = watch::channel(ChannelState::Connected);
    let state = Arc::new(state);
    let sender = ControlSender {
        writer: Mutex::new(Box::new(writer)),
        sequence: SequenceCounter::new(),
        event_ids: SequenceCounter::starting_at(1),
        state: Arc::clone(&state),
        peer,
    };
    let receiver = ControlReceiver {
        reader: Box::new(reader),
        state,
        last_event_id: None,
    };
    (sender, receiver)
}

fn mark_disconnected(state: &watch::Sender<ChannelState>, peer: Option<SocketAddr>) {
    if state.send_replace(ChannelState::Disconnected) == ChannelState::Connected {
        match peer {
            Some(peer) => info!("control channel to {peer} disconnected"),
            None => info!("control channel disconnected"),
        }
    }
}

// ── Sender half ───────────────────────────────────────────────────────────────

/// Writing half of a control channel.  Share it behind an `Arc`.
pub struct ControlSender {
    writer: Mutex<Box<dyn FrameWriter>>,
    sequence: SequenceCounter,
    event_ids: SequenceCounter,
    state: Arc<watch::Sender<ChannelState>>,
    peer: Option<SocketAddr>,
}

impl std::fmt::Debug for ControlSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSender")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ControlSender {
    /// Sends an input event, assigning it the connection's next `event_id`.
    ///
    /// Whatever id the caller set is overwritten.  Ids are assigned under the
    /// write lock, so concurrent senders can never put them on the wire out
    /// of order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Disconnected`] without any I/O if the channel
    /// is already down, or the underlying error if the write fails (which
    /// also marks the channel disconnected).
    pub async fn send(&self, mut event: ControlEvent) -> Result<EventId, ChannelError> {
        self.ensure_connected()?;
        let mut writer = self.writer.lock().await;
        event.event_id = self.event_ids.next();
        let event_id = event.event_id;
        self.write_locked(&mut writer, &ControlMessage::Event(event)).await?;
        Ok(event_id)
    }

    /// Sends any non-event control message.
    ///
    /// # Errors
    ///
    /// Same as [`ControlSender::send`].
    pub async fn send_message(&self, msg: &ControlMessage) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, msg).await
    }

    /// Sends a best-effort `Disconnect` and closes the write direction.
    pub async fn close(&self, reason: DisconnectReason) {
        if self.is_connected() {
            let mut writer = self.writer.lock().await;
            let msg = ControlMessage::Disconnect { reason };
            if let Err(e) = self.write_locked(&mut writer, &msg).await {
                debug!("disconnect notice not delivered: {e}");
            }
            if let Err(e) = writer.shutdown().await {
                debug!("control channel shutdown: {e}");
            }
        }
        mark_disconnected(&self.state, self.peer);
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Watches the connection state, e.g. to stop a stream on disconnect.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ChannelError::Disconnected)
        }
    }

    async fn write_locked(
        &self,
        writer: &mut Box<dyn FrameWriter>,
        msg: &ControlMessage,
    ) -> Result<(), ChannelError> {
        let bytes = encode_message_now(msg, self.sequence.next())?;
        if let Err(e) = writer.write_frame(&bytes).await {
            mark_disconnected(&self.state, self.peer);
            return Err(e);
        }
        Ok(())
    }
}

// ── Receiver half ─────────────────────────────────────────────────────────────

/// Reading half of a control channel.  Owned by exactly one task.
pub struct ControlReceiver {
    reader: Box<dyn FrameReader>,
    state: Arc<watch::Sender<ChannelState>>,
    last_event_id: Option<EventId>,
}

impl ControlReceiver {
    /// Waits for the next message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Disconnected`] when the peer closes the
    /// connection.  Malformed data and out-of-order events are fatal for the
    /// connection because skipping them would silently lose input.
    pub async fn recv(&mut self) -> Result<ControlMessage, ChannelError> {
        let frame = match self.reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                mark_disconnected(&self.state, None);
                return Err(ChannelError::Disconnected);
            }
            Err(e) => {
                mark_disconnected(&self.state, None);
                return Err(e);
            }
        };

        let msg = match decode_message(&frame) {
            Ok((msg, _)) => msg,
            Err(e) => {
                mark_disconnected(&self.state, None);
                return Err(e.into());
            }
        };

        if let ControlMessage::Event(event) = &msg {
            if let Some(last) = self.last_event_id {
                if event.event_id <= last {
                    mark_disconnected(&self.state, None);
                    return Err(ChannelError::OutOfOrder {
                        last,
                        got: event.event_id,
                    });
                }
            }
            self.last_event_id = Some(event.event_id);
        }
        Ok(msg)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Id of the most recent event received on this connection.
    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srvnc_core::{EventKind, ModifierFlags};
    use tokio::io::duplex;

    fn pair() -> (
        (ControlSender, ControlReceiver),
        (ControlSender, ControlReceiver),
    ) {
        let (a, b) = duplex(64 * 1024);
        (
            open(StreamTransport::new(a, None)),
            open(StreamTransport::new(b, None)),
        )
    }

    fn key(code: u16) -> ControlEvent {
        ControlEvent::new(EventKind::KeyDown {
            key_code: code,
            modifiers: ModifierFlags::default(),
        })
    }

    #[tokio::test]
    async fn test_events_arrive_in_order_with_increasing_ids() {
        // Arrange
        let ((viewer_tx, _viewer_rx), (_host_tx, mut host_rx)) = pair();

        // Act
        for code in [4u16, 5, 6] {
            viewer_tx.send(key(code)).await.expect("send");
        }

        // Assert
        let mut seen = Vec::new();
        for _ in 0..3 {
            match host_rx.recv().await.expect("recv") {
                ControlMessage::Event(e) => seen.push(e),
                other => panic!("unexpected {other:?}"),
            }
        }
        let ids: Vec<u64> = seen.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let codes: Vec<u16> = seen
            .iter()
            .map(|e| match e.kind {
                EventKind::KeyDown { key_code, .. } => key_code,
                _ => 0,
            })
            .collect();
        assert_eq!(codes, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_disconnected_and_blocks_sends() {
        // Arrange
        let ((viewer_tx, mut viewer_rx), (host_tx, host_rx)) = pair();

        // Act
        host_tx.close(DisconnectReason::ServerShutdown).await;
        drop(host_rx);
        drop(host_tx);

        // Assert – the disconnect notice arrives first, then the close
        assert_eq!(
            viewer_rx.recv().await.expect("notice"),
            ControlMessage::Disconnect { reason: DisconnectReason::ServerShutdown }
        );
        assert!(matches!(viewer_rx.recv().await, Err(ChannelError::Disconnected)));
        assert_eq!(viewer_tx.state(), ChannelState::Disconnected);
        assert!(matches!(
            viewer_tx.send(key(1)).await,
            Err(ChannelError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_state_watch_observes_disconnect() {
        let ((viewer_tx, _viewer_rx), _host) = pair();
        let mut watch = viewer_tx.subscribe();

        viewer_tx.close(DisconnectReason::UserInitiated).await;

        watch.changed().await.expect("state change");
        assert_eq!(*watch.borrow(), ChannelState::Disconnected);
    }

    #[test]
    fn test_transport_kind_parses_from_cli_and_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            transport: ControlTransportKind,
        }

        let from_toml: Wrapper = toml::from_str("transport = \"websocket\"").expect("toml");

        assert_eq!(from_toml.transport, ControlTransportKind::WebSocket);
        assert_eq!("ws".parse::<ControlTransportKind>(), Ok(ControlTransportKind::WebSocket));
        assert_eq!("TCP".parse::<ControlTransportKind>(), Ok(ControlTransportKind::Tcp));
        assert!("quic".parse::<ControlTransportKind>().is_err());
        assert_eq!(ControlTransportKind::default(), ControlTransportKind::Tcp);
    }
}
