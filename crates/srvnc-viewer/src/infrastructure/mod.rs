//! Infrastructure layer for the viewer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `srvnc_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – control connection: connect, register, keepalive, loss
//!   reports, and the reconnect loop.
//! - **`display`** – `DisplaySink` implementations (logging, recording).
//! - **`input`** – `InputSource` implementations (scripted demo, channel).
//! - **`storage`** – `viewer.toml` loading and saving.

pub mod display;
pub mod input;
pub mod network;
pub mod storage;
