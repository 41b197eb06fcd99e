//! Network infrastructure for the host.
//!
//! # Sub-modules
//!
//! - **`control_server`** – Accepts viewer control connections over TCP or
//!   WebSocket, runs the registration handshake, and spawns one stream
//!   coordinator per admitted session.  Also runs the inactivity sweeper.
//!
//! Frame chunks leave through a single shared `UdpTransport` from
//! `srvnc_transport`; there is no per-session socket.

pub mod control_server;
