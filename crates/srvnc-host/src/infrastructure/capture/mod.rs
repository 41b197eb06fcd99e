//! Frame sources for the stream coordinator.
//!
//! Real screen capture and encoding are external collaborators; this module
//! ships the synthetic source used for headless runs and tests.

pub mod synthetic;

pub use synthetic::SyntheticCapture;
