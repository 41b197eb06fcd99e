//! Input sources.
//!
//! Capturing the local keyboard and mouse is an external collaborator.  The
//! viewer ships a scripted demo source and a channel-backed source that
//! embedders (and tests) push events into.

pub mod channel;
pub mod synthetic;

pub use channel::ChannelInput;
pub use synthetic::SyntheticInput;
