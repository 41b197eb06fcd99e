//! Wire formats: control messages over the reliable channel and frame chunks
//! over datagrams.

pub mod codec;
pub mod datagram;
pub mod messages;
pub mod sequence;

pub use codec::{decode_header, decode_message, encode_message, encode_message_now, ProtocolError};
pub use datagram::{decode_chunk, encode_chunk};
pub use messages::*;
pub use sequence::SequenceCounter;
