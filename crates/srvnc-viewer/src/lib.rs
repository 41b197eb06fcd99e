//! srvnc-viewer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the viewer do? (for beginners)
//!
//! The viewer watches a remote screen and drives it:
//!
//! 1. Binds a UDP socket and registers with the host over the control
//!    channel, telling it where to stream.
//! 2. Reassembles the host's chunked frames.  Lost chunks are never
//!    retransmitted; a newer complete frame simply supersedes older partial
//!    ones.
//! 3. Hands the newest complete frame to the display.
//! 4. Sends local keyboard and mouse events back over the control channel,
//!    in order, and reports reassembly losses so the host can pace itself.

/// Application layer: use cases for the viewer.
pub mod application;

/// Infrastructure layer: network, display, input, and config adapters.
pub mod infrastructure;
