//! Display sinks.
//!
//! Rendering is an external collaborator.  The viewer ships a sink that logs
//! each frame it would show and a recording sink for tests.

pub mod logging;
pub mod mock;

pub use logging::LoggingDisplay;
pub use mock::RecordingDisplay;
