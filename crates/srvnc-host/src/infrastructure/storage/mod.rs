//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the host's TOML file from the platform
//! config directory (or a path given on the command line) and supplies
//! defaults for anything missing.

pub mod config;
