//! # srvnc-core
//!
//! Shared library for SR-VNC containing the frame chunker, the viewer-side
//! reassembly engine, and the binary codecs for both channels.
//!
//! This crate is used by both the host and the viewer.  It has no
//! dependencies on sockets, an async runtime, or OS capture/input APIs.
//!
//! # Architecture overview (for beginners)
//!
//! SR-VNC streams a host's screen to a viewer and sends the viewer's keyboard
//! and mouse input back.  The two directions have opposite needs:
//!
//! - **Frames** must be *fast*.  A late frame is worthless, so frames are cut
//!   into chunks and sent as UDP datagrams with no retransmission.  The viewer
//!   shows the newest complete frame and throws away anything older.
//! - **Input events** must be *reliable*.  They go over an ordered control
//!   connection (TCP or WebSocket) and are never dropped or reordered.
//!
//! This crate defines:
//!
//! - **`domain`** – frames, chunks, the chunker, checksums, the reassembly
//!   engine, and input events.
//! - **`protocol`** – how chunks and control messages look as bytes.

pub mod domain;
pub mod protocol;

pub use domain::checksum::ChecksumMode;
pub use domain::chunker::{chunk_frame, ChunkError, Chunker};
pub use domain::event::{ControlEvent, EventId, EventKind, ModifierFlags, MouseButton};
pub use domain::frame::{current_timestamp_us, Chunk, Frame, FrameId};
pub use domain::reassembly::{
    ChunkOutcome, InvalidChunk, ReassemblyConfig, ReassemblyEngine, ReassemblyStats,
    SharedReassembly,
};
pub use domain::{ClientId, SessionId};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::ControlMessage;
