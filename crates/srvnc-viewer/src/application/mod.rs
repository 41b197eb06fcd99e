//! Application layer use cases for the viewer.
//!
//! - **`receive_frames`** – Decodes chunk datagrams, reassembles them with
//!   most-recent-wins semantics, and hands the newest complete frame to a
//!   `DisplaySink`.  Also owns the sweep and display loops.
//!
//! - **`forward_input`** – Sends local input events to the host over the
//!   control channel, in order, dropping them while disconnected.

pub mod forward_input;
pub mod receive_frames;
