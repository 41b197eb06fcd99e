//! Persistent viewer settings.

pub mod config;
