//! Control transport over any reliable byte stream (TCP in production, an
//! in-memory duplex in tests).
//!
//! Framing comes for free from the control header: read the fixed 24 bytes,
//! learn `payload_len` from them, then read exactly that many more.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use srvnc_core::protocol::codec::decode_header;
use srvnc_core::protocol::messages::HEADER_SIZE;

use super::{ChannelError, ControlTransport, FrameReader, FrameWriter};

/// A byte stream plus the peer address it is connected to, if known.
pub struct StreamTransport<S> {
    stream: S,
    peer: Option<SocketAddr>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, peer: Option<SocketAddr>) -> Self {
        Self { stream, peer }
    }
}

impl StreamTransport<TcpStream> {
    /// Wraps an accepted or connected TCP stream.
    ///
    /// Nagle's algorithm is disabled: control messages are small and
    /// latency-sensitive.
    pub fn tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }
}

/// Opens a TCP control connection to `addr`.
///
/// # Errors
///
/// Returns [`ChannelError::Io`] if the connection cannot be established.
pub async fn connect_tcp(addr: SocketAddr) -> Result<StreamTransport<TcpStream>, ChannelError> {
    let stream = TcpStream::connect(addr).await?;
    info!("control channel connected to {addr} (tcp)");
    Ok(StreamTransport::tcp(stream))
}

impl<S> ControlTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = StreamFrameReader<ReadHalf<S>>;
    type Writer = StreamFrameWriter<WriteHalf<S>>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (read, write) = io::split(self.stream);
        (
            StreamFrameReader { inner: read },
            StreamFrameWriter { inner: write },
        )
    }
}

pub struct StreamFrameReader<R> {
    inner: R,
}

#[async_trait]
impl<R> FrameReader for StreamFrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut frame = vec![0u8; HEADER_SIZE];
        if let Err(e) = self.inner.read_exact(&mut frame).await {
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Ok(None)
            } else {
                Err(e.into())
            };
        }

        let header = decode_header(&frame)?;
        frame.resize(HEADER_SIZE + header.payload_len, 0);
        if header.payload_len > 0 {
            self.inner.read_exact(&mut frame[HEADER_SIZE..]).await?;
        }
        Ok(Some(frame))
    }
}

pub struct StreamFrameWriter<W> {
    inner: W,
}

#[async_trait]
impl<W> FrameWriter for StreamFrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srvnc_core::protocol::codec::encode_message;
    use srvnc_core::protocol::messages::ControlMessage;

    #[tokio::test]
    async fn test_reader_reassembles_frame_split_across_writes() {
        // Arrange
        let (client, server) = io::duplex(1024);
        let (mut reader, _) = StreamTransport::new(server, None).into_split();
        let (_, mut raw_writer) = io::split(client);
        let bytes = encode_message(&ControlMessage::Ping(9), 0, 0).expect("encode");

        // Act – dribble the frame in three pieces
        raw_writer.write_all(&bytes[..5]).await.expect("write");
        raw_writer.write_all(&bytes[5..HEADER_SIZE + 2]).await.expect("write");
        raw_writer.write_all(&bytes[HEADER_SIZE + 2..]).await.expect("write");

        // Assert
        let frame = reader.read_frame().await.expect("read").expect("frame");
        assert_eq!(frame, bytes);
    }

    #[tokio::test]
    async fn test_reader_reports_clean_eof_as_none() {
        let (client, server) = io::duplex(64);
        let (mut reader, _) = StreamTransport::new(server, None).into_split();
        drop(client);

        assert!(reader.read_frame().await.expect("no error").is_none());
    }

    #[tokio::test]
    async fn test_reader_rejects_garbage_header() {
        let (client, server) = io::duplex(64);
        let (mut reader, _) = StreamTransport::new(server, None).into_split();
        let (_, mut raw_writer) = io::split(client);

        raw_writer.write_all(&[0xFF; HEADER_SIZE]).await.expect("write");

        assert!(matches!(
            reader.read_frame().await,
            Err(ChannelError::Protocol(_))
        ));
    }
}
