//! # srvnc-transport
//!
//! Socket-level plumbing shared by the SR-VNC host and viewer:
//!
//! - [`datagram`] – best-effort UDP transport for frame chunks.
//! - [`control`] – reliable, ordered control channel over TCP or WebSocket.
//! - [`handshake`] – the registration exchange that opens a session.
//!
//! `srvnc-core` stays free of sockets; everything that touches tokio's
//! networking lives here.

pub mod control;
pub mod datagram;
pub mod handshake;

pub use control::{
    ChannelError, ChannelState, ControlReceiver, ControlSender, ControlTransport,
    ControlTransportKind, FrameReader, FrameWriter,
};
pub use datagram::{DatagramTransport, TransportError, UdpTransport};
pub use handshake::HandshakeError;
