//! TOML-based configuration for the viewer.
//!
//! Stored as `viewer.toml` next to the host's file in the platform config
//! directory (`~/.config/srvnc/viewer.toml` on Linux).  The viewer writes
//! its generated `client_id` back on first run so that restarts re-register
//! under the same identity and replace the old session.
//!
//! ```toml
//! [viewer]
//! client_id = "6f1c1e5e-8f7a-4a8e-9a57-0d7d0b8d2f11"
//!
//! [network]
//! host_address = "192.168.1.20"
//! transport = "ws"
//! listen_port = 10000
//!
//! [reassembly]
//! timeout_ms = 150
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use srvnc_core::{ClientId, ReassemblyConfig};
use srvnc_transport::ControlTransportKind;
use thiserror::Error;
use uuid::Uuid;

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

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewerConfig {
    #[serde(default)]
    pub viewer: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub reassembly: ReassemblySettings,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Generated on first run if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_host_address")]
    pub host_address: IpAddr,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default)]
    pub transport: ControlTransportKind,
    /// Local UDP port for incoming chunks.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Address advertised to the host for the datagram stream.  Unset means
    /// the host streams to the control connection's source address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<IpAddr>,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReassemblySettings {
    /// A partial frame older than this is abandoned.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_loss_report_interval_ms")]
    pub loss_report_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Drive the control channel with scripted pointer input.
    #[serde(default)]
    pub synthetic: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host_address() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}
fn default_control_port() -> u16 {
    8765
}
fn default_listen_port() -> u16 {
    10_000
}
fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_reconnect_interval_ms() -> u64 {
    2_000
}
fn default_registration_timeout_ms() -> u64 {
    5_000
}
fn default_timeout_ms() -> u64 {
    100
}
fn default_max_in_flight() -> usize {
    8
}
fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_loss_report_interval_ms() -> u64 {
    1_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: default_host_address(),
            control_port: default_control_port(),
            transport: ControlTransportKind::default(),
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
            advertise_host: None,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
        }
    }
}

impl Default for ReassemblySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            max_frame_bytes: default_max_frame_bytes(),
            loss_report_interval_ms: default_loss_report_interval_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host_address, self.control_port)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

impl ReassemblySettings {
    /// Engine settings; limits not exposed here keep their defaults.
    pub fn engine_config(&self) -> ReassemblyConfig {
        ReassemblyConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_in_flight: self.max_in_flight,
            max_frame_bytes: self.max_frame_bytes,
            ..ReassemblyConfig::default()
        }
    }

    pub fn loss_report_interval(&self) -> Duration {
        Duration::from_millis(self.loss_report_interval_ms)
    }
}

impl ViewerConfig {
    /// Returns the configured client id, generating one if absent.
    ///
    /// The `bool` is `true` when a new id was generated and the file should
    /// be saved.
    pub fn ensure_client_id(&mut self) -> (ClientId, bool) {
        match self.viewer.client_id {
            Some(id) => (id, false),
            None => {
                let id = Uuid::new_v4();
                self.viewer.client_id = Some(id);
                (id, true)
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reassembly;
        if r.timeout_ms == 0 {
            return Err(ConfigError::Invalid("reassembly.timeout_ms must be > 0".into()));
        }
        if r.max_in_flight == 0 {
            return Err(ConfigError::Invalid("reassembly.max_in_flight must be > 0".into()));
        }
        if r.loss_report_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reassembly.loss_report_interval_ms must be > 0".into(),
            ));
        }
        if self.network.host_address.is_unspecified() {
            return Err(ConfigError::Invalid(
                "network.host_address must be a concrete address".into(),
            ));
        }
        Ok(())
    }
}

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("viewer.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from the platform default location.
///
/// A missing file yields `ViewerConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ViewerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ViewerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config(config: &ViewerConfig, path: &Path) -> Result<(), ConfigError> {
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
    fn test_defaults_point_at_local_host() {
        let cfg = ViewerConfig::default();

        assert_eq!(cfg.network.control_addr(), "127.0.0.1:8765".parse().unwrap());
        assert_eq!(cfg.network.listen_port, 10_000);
        assert_eq!(cfg.reassembly.engine_config().timeout, Duration::from_millis(100));
        assert!(cfg.viewer.client_id.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_ws_alias_and_partial_sections() {
        // Arrange
        let toml_str = r#"
[network]
transport = "ws"
advertise_host = "10.1.2.3"

[reassembly]
timeout_ms = 250
"#;

        // Act
        let cfg: ViewerConfig = toml::from_str(toml_str).expect("parse");

        // Assert
        assert_eq!(cfg.network.transport, ControlTransportKind::WebSocket);
        assert_eq!(cfg.network.advertise_host, Some("10.1.2.3".parse().unwrap()));
        assert_eq!(cfg.reassembly.timeout_ms, 250);
        assert_eq!(cfg.reassembly.max_in_flight, 8);
    }

    #[test]
    fn test_ensure_client_id_generates_once() {
        // Arrange
        let mut cfg = ViewerConfig::default();

        // Act
        let (first, generated) = cfg.ensure_client_id();
        let (second, regenerated) = cfg.ensure_client_id();

        // Assert
        assert!(generated);
        assert!(!regenerated);
        assert_eq!(first, second);
    }

    #[test]
    fn test_client_id_survives_save_and_load() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("srvnc-viewer-cfg-{}", Uuid::new_v4()));
        let path = dir.join("viewer.toml");
        let mut cfg = ViewerConfig::default();
        let (id, _) = cfg.ensure_client_id();

        // Act
        save_config(&cfg, &path).expect("save");
        let mut loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded.ensure_client_id(), (id, false));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_wildcard_host() {
        let mut cfg = ViewerConfig::default();
        cfg.reassembly.timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = ViewerConfig::default();
        cfg.network.host_address = "0.0.0.0".parse().unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = load_config(Path::new("/nonexistent/srvnc/viewer.toml")).expect("defaults");
        assert_eq!(cfg, ViewerConfig::default());
    }
}
