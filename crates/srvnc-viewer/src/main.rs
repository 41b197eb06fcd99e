//! SR-VNC viewer entry point.
//!
//! # Usage
//!
//! ```text
//! srvnc-viewer [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [env: SRVNC_VIEWER_CONFIG]
//!   --host <IP>              Host address [env: SRVNC_HOST]
//!   --control-port <PORT>    Host control port [env: SRVNC_CONTROL_PORT]
//!   --transport <KIND>       tcp | websocket [env: SRVNC_TRANSPORT]
//!   --listen-port <PORT>     Local UDP port for frame chunks [env: SRVNC_LISTEN_PORT]
//!   --synthetic-input        Send scripted pointer input
//!   --log-level <FILTER>     Log filter when RUST_LOG is unset
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load ViewerConfig (+ CLI overrides, persist client_id)
//!  └─ bind UdpTransport (listen port)
//!  └─ start tasks
//!       ├─ run_datagram_loop    (chunks -> reassembly)
//!       ├─ run_sweeper          (reassembly timeout)
//!       ├─ run_display          (latest frame -> LoggingDisplay)
//!       ├─ run_connection_loop  (register, loss reports, reconnect)
//!       └─ run_input_forwarder  (only with synthetic input)
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use srvnc_core::protocol::datagram::MAX_UDP_PAYLOAD;
use srvnc_transport::{ControlTransportKind, DatagramTransport, UdpTransport};
use srvnc_viewer::application::forward_input::run_input_forwarder;
use srvnc_viewer::application::receive_frames::{
    run_datagram_loop, run_display, run_sweeper, ReceiveFramesUseCase,
};
use srvnc_viewer::infrastructure::display::LoggingDisplay;
use srvnc_viewer::infrastructure::input::SyntheticInput;
use srvnc_viewer::infrastructure::network::{start_connection, ConnectionConfig, ConnectionStatus};
use srvnc_viewer::infrastructure::storage::config::{
    config_file_path, load_config, save_config, ViewerConfig,
};

/// SR-VNC viewer: shows the host's frame stream and sends input back.
#[derive(Debug, Parser)]
#[command(name = "srvnc-viewer", version)]
struct Cli {
    /// TOML config file.  Defaults to the platform config directory.
    #[arg(long, env = "SRVNC_VIEWER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SRVNC_HOST")]
    host: Option<IpAddr>,

    #[arg(long, env = "SRVNC_CONTROL_PORT")]
    control_port: Option<u16>,

    #[arg(long, env = "SRVNC_TRANSPORT")]
    transport: Option<ControlTransportKind>,

    #[arg(long, env = "SRVNC_LISTEN_PORT")]
    listen_port: Option<u16>,

    #[arg(long)]
    synthetic_input: bool,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, mut config: ViewerConfig) -> ViewerConfig {
        if let Some(host) = self.host {
            config.network.host_address = host;
        }
        if let Some(port) = self.control_port {
            config.network.control_port = port;
        }
        if let Some(kind) = self.transport {
            config.network.transport = kind;
        }
        if let Some(port) = self.listen_port {
            config.network.listen_port = port;
        }
        if self.synthetic_input {
            config.input.synthetic = true;
        }
        if let Some(level) = &self.log_level {
            config.viewer.log_level = level.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => config_file_path().ok(),
    };
    let mut stored = match &config_path {
        Some(path) => load_config(path).context("loading viewer config")?,
        None => ViewerConfig::default(),
    };
    let (client_id, generated) = stored.ensure_client_id();
    let config = cli.apply(stored.clone());
    config.validate().context("validating viewer config")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.viewer.log_level)),
        )
        .init();

    info!(%client_id, "SR-VNC viewer starting");
    if generated {
        // Only the generated id is persisted; CLI overrides stay transient.
        match &config_path {
            Some(path) => {
                if let Err(e) = save_config(&stored, path) {
                    warn!("could not persist client id: {e}");
                }
            }
            None => warn!("no config directory; client id will change on restart"),
        }
    }

    let listen_addr = config.network.listen_addr();
    let transport: Arc<dyn DatagramTransport> = Arc::new(
        UdpTransport::bind(listen_addr, MAX_UDP_PAYLOAD)
            .await
            .with_context(|| format!("binding datagram socket on {listen_addr}"))?,
    );
    let datagram_port = transport
        .local_addr()
        .map(|a| a.port())
        .unwrap_or(config.network.listen_port);

    let frames = Arc::new(ReceiveFramesUseCase::new(config.reassembly.engine_config()));
    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    // ── Frame path ────────────────────────────────────────────────────────────
    tokio::spawn(run_datagram_loop(
        Arc::clone(&transport),
        Arc::clone(&frames),
        Arc::clone(&running),
    ));
    tokio::spawn(run_sweeper(Arc::clone(&frames), Arc::clone(&running)));
    let display = tokio::spawn(run_display(
        frames.subscribe(),
        Arc::new(LoggingDisplay::default()),
        Arc::clone(&running),
    ));

    // ── Control channel ───────────────────────────────────────────────────────
    let (current_tx, current_rx) = watch::channel(None);
    let net = &config.network;
    let connection = ConnectionConfig {
        control_addr: net.control_addr(),
        transport: net.transport,
        client_id,
        datagram_port,
        datagram_host: net.advertise_host,
        reconnect_interval: net.reconnect_interval(),
        registration_timeout: net.registration_timeout(),
        loss_report_interval: config.reassembly.loss_report_interval(),
    };
    let (mut status_rx, connection_task) =
        start_connection(connection, Arc::clone(&frames), current_tx, Arc::clone(&running));

    if config.input.synthetic {
        let source = Box::new(SyntheticInput::new(Duration::from_millis(50)));
        tokio::spawn(run_input_forwarder(source, current_rx, Arc::clone(&running)));
    }

    info!("SR-VNC viewer ready.  Press Ctrl-C to exit.");
    while let Some(status) = status_rx.recv().await {
        match status {
            ConnectionStatus::Connecting => info!("connecting to {}", config.network.control_addr()),
            ConnectionStatus::Connected { session_id } => info!(%session_id, "streaming"),
            ConnectionStatus::Rejected(reason) => warn!("host rejected this viewer: {reason}"),
            ConnectionStatus::ConnectionLost => warn!("connection lost; reconnecting"),
            ConnectionStatus::Stopped => break,
        }
    }

    // A permanent rejection ends the loop without Ctrl-C.
    running.store(false, Ordering::Relaxed);
    if let Err(e) = connection_task.await {
        warn!("connection task ended abnormally: {e}");
    }
    let shown = display.await.unwrap_or_default();
    let stats = frames.reassembly_stats();
    info!(
        shown,
        delivered = stats.delivered,
        abandoned = stats.abandoned(),
        "SR-VNC viewer stopped"
    );
    Ok(())
}
