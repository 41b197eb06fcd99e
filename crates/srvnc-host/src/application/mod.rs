//! Application layer use cases for the host.
//!
//! Use cases here orchestrate the domain types from `srvnc_core` and depend
//! only on traits for anything OS-facing, so every one of them can be driven
//! from a unit test.
//!
//! # Sub-modules
//!
//! - **`session_registry`** – Which viewers are registered, where their
//!   datagrams go, and the lifecycle state of each stream.
//!
//! - **`stream_coordinator`** – The per-session loop: capture, chunk, send,
//!   react to feedback and stop signals.  Also drains the control channel.
//!
//! - **`pacing`** – Turns send failures and viewer loss reports into the
//!   next frame interval.
//!
//! - **`inject_input`** – Applies the viewer's control events through an
//!   injection sink, in order.

pub mod inject_input;
pub mod pacing;
pub mod session_registry;
pub mod stream_coordinator;
