//! Injection sinks.
//!
//! OS-level injection is an external collaborator.  The host ships a sink
//! that logs every event (headless runs) and a recording sink for tests.

pub mod logging;
pub mod mock;

pub use logging::LoggingSink;
pub use mock::RecordingSink;
