//! Infrastructure layer for the host.
//!
//! Contains the adapters around the application layer: frame capture
//! sources, injection sinks, the control server, and config storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `srvnc_core`, but MUST NOT be imported by the `application` layer.

pub mod capture;
pub mod injection;
pub mod network;
pub mod storage;
