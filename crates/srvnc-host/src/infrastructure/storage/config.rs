//! TOML-based configuration for the host.
//!
//! The file lives in the platform config directory unless a path is given on
//! the command line:
//! - Windows:  `%APPDATA%\SRVNC\host.toml`
//! - Linux:    `~/.config/srvnc/host.toml`
//! - macOS:    `~/Library/Application Support/SRVNC/host.toml`
//!
//! Example:
//!
//! ```toml
//! [host]
//! log_level = "debug"
//!
//! [network]
//! control_port = 8765
//! transport = "websocket"
//!
//! [stream]
//! frame_interval_ms = 33
//! max_payload_size = 1200
//! checksum = "blake3"
//!
//! [sessions]
//! max_sessions = 4
//! allowed_clients = ["6f1c1e5e-8f7a-4a8e-9a57-0d7d0b8d2f11"]
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, so a missing file, a missing
//! section or a missing key all fall back to the defaults below.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use srvnc_core::domain::chunker::MAX_CHUNK_PAYLOAD;
use srvnc_core::ChecksumMode;
use srvnc_transport::ControlTransportKind;
use thiserror::Error;
use uuid::Uuid;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed fine but the values cannot work together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Port viewers connect to for the control channel.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Local UDP port frame chunks are sent from.
    #[serde(default = "default_datagram_port")]
    pub datagram_port: u16,
    #[serde(default)]
    pub transport: ControlTransportKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Target interval between frames.  33 ms is roughly 30 fps.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// When `false` the interval never changes.
    #[serde(default = "default_true")]
    pub adaptive_pacing: bool,
    /// Largest chunk payload put in one datagram.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    #[serde(default)]
    pub checksum: ChecksumMode,
    /// Size of each frame produced by the synthetic capture source.
    #[serde(default = "default_synthetic_frame_bytes")]
    pub synthetic_frame_bytes: usize,
    #[serde(default = "default_max_consecutive_send_failures")]
    pub max_consecutive_send_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// A session with no control traffic for this long is closed.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    /// How long a fresh connection has to send `Register`.
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,
    /// If non-empty, only these client ids may register.
    #[serde(default)]
    pub allowed_clients: Vec<Uuid>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_control_port() -> u16 {
    8765
}
fn default_datagram_port() -> u16 {
    9999
}
fn default_frame_interval_ms() -> u64 {
    33
}
fn default_min_interval_ms() -> u64 {
    16
}
fn default_max_interval_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}
fn default_max_payload_size() -> usize {
    1200
}
fn default_synthetic_frame_bytes() -> usize {
    48 * 1024
}
fn default_max_consecutive_send_failures() -> u32 {
    30
}
fn default_max_sessions() -> usize {
    8
}
fn default_inactivity_timeout_secs() -> u64 {
    30
}
fn default_registration_timeout_secs() -> u64 {
    5
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            datagram_port: default_datagram_port(),
            transport: ControlTransportKind::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            adaptive_pacing: default_true(),
            max_payload_size: default_max_payload_size(),
            checksum: ChecksumMode::default(),
            synthetic_frame_bytes: default_synthetic_frame_bytes(),
            max_consecutive_send_failures: default_max_consecutive_send_failures(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            registration_timeout_secs: default_registration_timeout_secs(),
            allowed_clients: Vec::new(),
        }
    }
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl SessionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    /// `true` if `client_id` passes the allow-list.
    pub fn is_allowed(&self, client_id: &Uuid) -> bool {
        self.allowed_clients.is_empty() || self.allowed_clients.contains(client_id)
    }
}

impl HostConfig {
    /// Checks that the values can work together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if s.max_payload_size == 0 || s.max_payload_size > MAX_CHUNK_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "stream.max_payload_size must be in 1..={MAX_CHUNK_PAYLOAD}, got {}",
                s.max_payload_size
            )));
        }
        if s.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("stream.frame_interval_ms must be > 0".into()));
        }
        if !(s.min_interval_ms <= s.frame_interval_ms && s.frame_interval_ms <= s.max_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "stream intervals must satisfy min <= frame <= max, got {} <= {} <= {}",
                s.min_interval_ms, s.frame_interval_ms, s.max_interval_ms
            )));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Invalid("sessions.max_sessions must be > 0".into()));
        }
        if s.max_consecutive_send_failures == 0 {
            return Err(ConfigError::Invalid(
                "stream.max_consecutive_send_failures must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("host.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the platform default location.
///
/// A missing file yields `HostConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Ok(p) => p,
            Err(ConfigError::NoPlatformConfigDir) => return Ok(HostConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SRVNC"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("srvnc"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("SRVNC"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_ports() {
        // Arrange / Act
        let cfg = HostConfig::default();

        // Assert
        assert_eq!(cfg.network.control_port, 8765);
        assert_eq!(cfg.network.datagram_port, 9999);
        assert_eq!(cfg.stream.frame_interval(), Duration::from_millis(33));
        assert_eq!(cfg.stream.checksum, ChecksumMode::Blake3);
        assert_eq!(cfg.network.transport, ControlTransportKind::Tcp);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: HostConfig = toml::from_str("").expect("empty document");
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[stream]
max_payload_size = 8000
checksum = "disabled"

[network]
transport = "websocket"
"#;

        // Act
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.stream.max_payload_size, 8000);
        assert_eq!(cfg.stream.checksum, ChecksumMode::Disabled);
        assert_eq!(cfg.stream.frame_interval_ms, 33);
        assert_eq!(cfg.network.transport, ControlTransportKind::WebSocket);
        assert_eq!(cfg.network.control_port, 8765);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut cfg = HostConfig::default();
        cfg.sessions.allowed_clients.push(Uuid::new_v4());
        cfg.network.bind_address = "127.0.0.1".parse().expect("ip");

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: HostConfig = toml::from_str(&toml_str).expect("deserialize");

        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let mut cfg = HostConfig::default();
        cfg.stream.max_payload_size = MAX_CHUNK_PAYLOAD + 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_interval_outside_bounds() {
        let mut cfg = HostConfig::default();
        cfg.stream.frame_interval_ms = 500;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_allow_list_semantics() {
        let mut sessions = SessionConfig::default();
        let known = Uuid::new_v4();
        assert!(sessions.is_allowed(&Uuid::new_v4()), "empty list allows everyone");

        sessions.allowed_clients.push(known);

        assert!(sessions.is_allowed(&known));
        assert!(!sessions.is_allowed(&Uuid::new_v4()));
    }

    #[test]
    fn test_load_config_missing_file_yields_defaults() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/host.toml");
        let cfg = load_config(Some(&path)).expect("defaults");
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_save_then_load_from_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("srvnc-host-cfg-{}", Uuid::new_v4()));
        let path = dir.join("host.toml");
        let mut cfg = HostConfig::default();
        cfg.sessions.max_sessions = 2;

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(Some(&path)).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result: Result<HostConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }
}
