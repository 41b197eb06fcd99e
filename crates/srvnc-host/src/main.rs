//! SR-VNC host entry point.
//!
//! Loads the TOML config, applies command-line overrides, and starts the
//! control server.  Every admitted viewer gets its own stream coordinator
//! fed by the synthetic capture source; input events are written to the log.
//!
//! # Usage
//!
//! ```text
//! srvnc-host [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [env: SRVNC_HOST_CONFIG]
//!   --control-port <PORT>    Control listener port [env: SRVNC_CONTROL_PORT]
//!   --datagram-port <PORT>   Local UDP port for frame chunks [env: SRVNC_DATAGRAM_PORT]
//!   --transport <KIND>       tcp | websocket [env: SRVNC_TRANSPORT]
//!   --max-payload <BYTES>    Largest chunk payload [env: SRVNC_MAX_PAYLOAD]
//!   --interval-ms <MS>       Target frame interval [env: SRVNC_INTERVAL_MS]
//!   --log-level <FILTER>     Log filter when RUST_LOG is unset
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load HostConfig (+ CLI overrides)
//!  └─ bind UdpTransport (datagram port) and TcpListener (control port)
//!  └─ start services
//!       ├─ run_control_server   (accept loop, one task per connection)
//!       ├─ run_session_sweeper  (inactivity timeout)
//!       └─ session event pump   (logs lifecycle events)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

use srvnc_core::protocol::datagram::MAX_UDP_PAYLOAD;
use srvnc_host::application::session_registry::SessionRegistry;
use srvnc_host::application::stream_coordinator::CaptureSource;
use srvnc_host::infrastructure::capture::SyntheticCapture;
use srvnc_host::infrastructure::injection::LoggingSink;
use srvnc_host::infrastructure::network::control_server::{
    bind_control_listener, run_control_server, run_session_sweeper, stop_all_sessions,
    CaptureFactory, HostServices, SessionEvent,
};
use srvnc_host::infrastructure::storage::config::{load_config, HostConfig};
use srvnc_transport::{ControlTransportKind, UdpTransport};

/// SR-VNC host: streams frames to registered viewers over UDP and applies
/// their input events.
#[derive(Debug, Parser)]
#[command(name = "srvnc-host", version)]
struct Cli {
    /// TOML config file.  Defaults to the platform config directory.
    #[arg(long, env = "SRVNC_HOST_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SRVNC_CONTROL_PORT")]
    control_port: Option<u16>,

    #[arg(long, env = "SRVNC_DATAGRAM_PORT")]
    datagram_port: Option<u16>,

    #[arg(long, env = "SRVNC_TRANSPORT")]
    transport: Option<ControlTransportKind>,

    /// Largest chunk payload in bytes.
    #[arg(long, env = "SRVNC_MAX_PAYLOAD")]
    max_payload: Option<usize>,

    #[arg(long, env = "SRVNC_INTERVAL_MS")]
    interval_ms: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, mut config: HostConfig) -> HostConfig {
        if let Some(port) = self.control_port {
            config.network.control_port = port;
        }
        if let Some(port) = self.datagram_port {
            config.network.datagram_port = port;
        }
        if let Some(kind) = self.transport {
            config.network.transport = kind;
        }
        if let Some(max) = self.max_payload {
            config.stream.max_payload_size = max;
        }
        if let Some(ms) = self.interval_ms {
            config.stream.frame_interval_ms = ms;
            config.stream.min_interval_ms = config.stream.min_interval_ms.min(ms);
            config.stream.max_interval_ms = config.stream.max_interval_ms.max(ms);
        }
        if let Some(level) = self.log_level {
            config.host.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let config = load_config(config_path.as_deref()).context("loading host config")?;
    let config = cli.apply(config);
    config.validate().context("validating host config")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    info!("SR-VNC host starting");

    let net = &config.network;
    let datagram_addr = SocketAddr::new(net.bind_address, net.datagram_port);
    let datagrams = UdpTransport::bind(datagram_addr, MAX_UDP_PAYLOAD)
        .await
        .with_context(|| format!("binding datagram socket on {datagram_addr}"))?;
    let control_addr = SocketAddr::new(net.bind_address, net.control_port);
    let listener = bind_control_listener(control_addr)
        .await
        .with_context(|| format!("binding control listener on {control_addr}"))?;

    let frame_bytes = config.stream.synthetic_frame_bytes;
    let capture: CaptureFactory =
        Arc::new(move || Box::new(SyntheticCapture::new(frame_bytes)) as Box<dyn CaptureSource>);
    let (events_tx, mut events_rx) = mpsc::channel(128);
    let services = Arc::new(HostServices {
        registry: Arc::new(RwLock::new(SessionRegistry::new(config.sessions.max_sessions))),
        config: Arc::new(config),
        datagrams: Arc::new(datagrams),
        capture,
        injection: Arc::new(LoggingSink),
        events: events_tx,
    });

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Session event pump ────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Registered { session_id, client_id, endpoint } => {
                    info!(%session_id, %client_id, %endpoint, "viewer connected");
                }
                SessionEvent::Rejected { client_id, peer, reason } => {
                    info!(%client_id, ?peer, "viewer rejected: {reason}");
                }
                SessionEvent::Replaced { session_id, client_id } => {
                    info!(%session_id, %client_id, "viewer reconnected, old session replaced");
                }
                SessionEvent::Ended(summary) => {
                    info!(
                        session_id = %summary.session_id,
                        reason = ?summary.reason,
                        frames = summary.stats.frames_sent,
                        bytes = summary.stats.bytes_sent,
                        "session ended"
                    );
                }
            }
        }
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    tokio::spawn(run_session_sweeper(Arc::clone(&services), Arc::clone(&running)));

    info!("SR-VNC host ready.  Press Ctrl-C to exit.");
    run_control_server(listener, Arc::clone(&services), Arc::clone(&running)).await;

    stop_all_sessions(&services).await;
    info!("SR-VNC host stopped");
    Ok(())
}
