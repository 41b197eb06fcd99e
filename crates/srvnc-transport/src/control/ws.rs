//! Control transport over WebSocket binary messages.
//!
//! Each control frame travels as exactly one binary WebSocket message, so no
//! extra framing is needed.  Text messages are ignored; WebSocket-level
//! ping/pong is answered by tungstenite itself.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChannelError, ControlTransport, FrameReader, FrameWriter};

pub struct WsTransport<S> {
    ws: WebSocketStream<S>,
    peer: Option<SocketAddr>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, peer: Option<SocketAddr>) -> Self {
        Self { ws, peer }
    }
}

/// Completes the server side of the WebSocket upgrade on an accepted socket.
///
/// # Errors
///
/// Returns [`ChannelError::WebSocket`] if the HTTP upgrade fails.
pub async fn accept_ws(stream: TcpStream) -> Result<WsTransport<TcpStream>, ChannelError> {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY: {e}");
    }
    let ws = accept_async(stream).await?;
    Ok(WsTransport::new(ws, peer))
}

/// Connects to a `ws://` control endpoint.
///
/// # Errors
///
/// Returns [`ChannelError::WebSocket`] if the connection or upgrade fails.
pub async fn connect_ws(
    url: &str,
) -> Result<WsTransport<MaybeTlsStream<TcpStream>>, ChannelError> {
    let (ws, _response) = connect_async(url).await?;
    let peer = match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    info!("control channel connected to {url} (websocket)");
    Ok(WsTransport::new(ws, peer))
}

impl<S> ControlTransport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WsFrameReader<S>;
    type Writer = WsFrameWriter<S>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.ws.split();
        (WsFrameReader { stream }, WsFrameWriter { sink })
    }
}

pub struct WsFrameReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(e.into()),
            };
            match msg {
                WsMessage::Binary(data) => return Ok(Some(data)),
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Text(text) => {
                    warn!("ignoring {}-byte text message on control channel", text.len());
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }
}

pub struct WsFrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S> FrameWriter for WsFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        self.sink.send(WsMessage::Binary(frame.to_vec())).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
