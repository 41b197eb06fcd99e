//! Domain entities for SR-VNC.
//!
//! Pure logic with no sockets, no async runtime, and no OS APIs:
//!
//! - [`frame`] – frames and the chunks they are split into.
//! - [`chunker`] – deterministic frame → chunk splitting.
//! - [`checksum`] – optional per-chunk payload checksums.
//! - [`reassembly`] – viewer-side most-recent-wins frame reassembly.
//! - [`event`] – input events sent from the viewer to the host.
//!
//! Everything here can be tested without any network setup, which is where
//! most of the interesting behaviour (stale-frame handling, supersession,
//! timeouts) is exercised.

pub mod checksum;
pub mod chunker;
pub mod event;
pub mod frame;
pub mod reassembly;

use uuid::Uuid;

/// Stable identity a viewer presents when registering.
///
/// Re-registering with the same id replaces the previous session.
pub type ClientId = Uuid;

/// Identifier issued by the host for one registration.
pub type SessionId = Uuid;
