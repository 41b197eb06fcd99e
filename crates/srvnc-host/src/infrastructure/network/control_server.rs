//! Control server: accepts viewer connections and turns them into sessions.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//! accept ──► (WebSocket upgrade) ──► await Register ──► admit?
//!                                                        │
//!                     RegisterRejected ◄── no ───────────┤
//!                                                        │ yes
//!                                                        ▼
//!            RegisterAccepted, spawn StreamCoordinator + drain_control
//!                                                        │
//!                                 coordinator finishes ◄─┘
//!                                   (Disconnect sent if the host ended it)
//! ```
//!
//! Admission checks, in order: protocol version, allow-list, capacity.  A
//! registration from a client that already has a session replaces it; the
//! old coordinator is stopped and its viewer told why, and the new session is
//! only accepted once the old stream has closed.
//!
//! The accept loop polls a shared `running` flag every 200 ms so that a
//! shutdown request is noticed promptly even when nobody connects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use srvnc_core::protocol::messages::{
    ControlMessage, DisconnectReason, RegisterAcceptedMessage, RegisterMessage, RejectReason,
    PROTOCOL_VERSION,
};
use srvnc_core::{ChecksumMode, Chunker, ChunkError, ClientId, SessionId};
use srvnc_transport::control::{self, accept_ws, StreamTransport};
use srvnc_transport::handshake::{await_registration, HandshakeError};
use srvnc_transport::{
    ChannelError, ControlReceiver, ControlSender, ControlTransportKind, DatagramTransport,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::inject_input::{InjectInputUseCase, InjectionSink};
use crate::application::pacing::{AdaptiveConfig, AdaptiveInterval, FixedInterval, PacingPolicy};
use crate::application::stream_coordinator::{
    drain_control, CaptureSource, CoordinatorConfig, SessionHandle, SharedRegistry, StopReason,
    StreamCoordinator, StreamSummary, SIGNAL_QUEUE_DEPTH,
};
use crate::infrastructure::storage::config::HostConfig;

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How often the inactivity sweeper runs.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// How long a re-registration waits for the replaced stream to close.
const REPLACE_DRAIN: Duration = Duration::from_secs(2);

/// Error type for the control server.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The viewer named no datagram host and its control peer is unknown.
    #[error("cannot determine datagram endpoint for client {0}")]
    NoDatagramHost(ClientId),

    #[error("invalid stream configuration: {0}")]
    Chunker(#[from] ChunkError),
}

/// Lifecycle notifications for the rest of the host (logging, UI).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Registered {
        session_id: SessionId,
        client_id: ClientId,
        endpoint: SocketAddr,
    },
    Rejected {
        client_id: ClientId,
        peer: Option<SocketAddr>,
        reason: RejectReason,
    },
    Replaced {
        session_id: SessionId,
        client_id: ClientId,
    },
    Ended(StreamSummary),
}

/// Builds a fresh capture source for each new session.
pub type CaptureFactory = Arc<dyn Fn() -> Box<dyn CaptureSource> + Send + Sync>;

/// Everything a session needs, shared by all connections.
pub struct HostServices {
    pub config: Arc<HostConfig>,
    pub registry: SharedRegistry<SessionHandle>,
    pub datagrams: Arc<dyn DatagramTransport>,
    pub capture: CaptureFactory,
    pub injection: Arc<dyn InjectionSink>,
    pub events: mpsc::Sender<SessionEvent>,
}

impl HostServices {
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("session event dropped: {e}");
        }
    }

    fn pacing(&self) -> Box<dyn PacingPolicy> {
        let s = &self.config.stream;
        if s.adaptive_pacing {
            let mut cfg = AdaptiveConfig::around(s.frame_interval());
            cfg.min = s.min_interval();
            cfg.max = s.max_interval();
            Box::new(AdaptiveInterval::new(cfg))
        } else {
            Box::new(FixedInterval(s.frame_interval()))
        }
    }
}

/// Binds the control listener.
///
/// # Errors
///
/// Returns [`NetworkError::BindFailed`] if the port is unavailable.
pub async fn bind_control_listener(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::BindFailed { addr, source })
}

/// Accepts control connections until `running` is cleared.
pub async fn run_control_server(
    listener: TcpListener,
    services: Arc<HostServices>,
    running: Arc<AtomicBool>,
) {
    match listener.local_addr() {
        Ok(addr) => info!(
            "control server listening on {addr} ({})",
            services.config.network.transport
        ),
        Err(e) => warn!("control server listening (address unknown: {e})"),
    }

    while running.load(Ordering::Relaxed) {
        let accept = timeout(ACCEPT_POLL, listener.accept()).await;
        let (stream, peer) = match accept {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!("control accept error: {e}");
                continue;
            }
            // Timeout: loop back to check the running flag.
            Err(_) => continue,
        };

        debug!("control connection from {peer}");
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            handle_connection(stream, peer, services).await;
        });
    }

    info!("control server stopped");
}

/// Handles one accepted TCP connection, logging any error.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, services: Arc<HostServices>) {
    if let Err(e) = run_connection(stream, services).await {
        warn!("control connection from {peer} ended with error: {e}");
    }
}

async fn run_connection(stream: TcpStream, services: Arc<HostServices>) -> Result<(), NetworkError> {
    let (sender, receiver) = match services.config.network.transport {
        ControlTransportKind::Tcp => control::open(StreamTransport::tcp(stream)),
        ControlTransportKind::WebSocket => control::open(accept_ws(stream).await?),
    };
    serve_session(sender, receiver, services).await?;
    Ok(())
}

/// Runs the registration handshake and, if admitted, the whole session.
///
/// Returns the stream summary for admitted sessions and `None` for rejected
/// ones.
///
/// # Errors
///
/// Returns [`NetworkError`] if the handshake fails or the endpoint cannot be
/// determined.
pub async fn serve_session(
    sender: ControlSender,
    mut receiver: ControlReceiver,
    services: Arc<HostServices>,
) -> Result<Option<StreamSummary>, NetworkError> {
    let peer = sender.peer_addr();
    let sessions = &services.config.sessions;
    let request = await_registration(&mut receiver, sessions.registration_timeout()).await?;
    let client_id = request.client_id;

    if let Some(reason) = admission_check(&request, &services.config) {
        reject(&sender, &services, client_id, peer, reason).await;
        return Ok(None);
    }

    let endpoint = datagram_endpoint(&request, peer)?;
    let chunker = Chunker::new(services.config.stream.max_payload_size, services.config.stream.checksum)?;
    let sender = Arc::new(sender);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_DEPTH);
    let (finished_tx, finished_rx) = watch::channel(false);
    let handle = SessionHandle {
        control: Arc::clone(&sender),
        signals: signal_tx.clone(),
        finished: finished_rx,
    };

    let registration = services.registry.write().await.register(client_id, endpoint, handle);
    let registration = match registration {
        Ok(r) => r,
        Err(reason) => {
            reject(&sender, &services, client_id, peer, reason).await;
            return Ok(None);
        }
    };
    let session_id = registration.session.session_id;

    // Old chunks must stop before the viewer resets for the new session.
    for old in registration.replaced {
        info!(old = %old.session_id, new = %session_id, "session replaced");
        old.control.stop(StopReason::Replaced).await;
        if !old.control.wait_finished(REPLACE_DRAIN).await {
            warn!(old = %old.session_id, "replaced stream still open after {REPLACE_DRAIN:?}");
        }
        services.emit(SessionEvent::Replaced {
            session_id: old.session_id,
            client_id: old.client_id,
        });
    }

    let accepted = ControlMessage::RegisterAccepted(RegisterAcceptedMessage {
        session_id,
        max_payload_size: services.config.stream.max_payload_size as u32,
        checksums: services.config.stream.checksum != ChecksumMode::Disabled,
    });
    if let Err(e) = sender.send_message(&accepted).await {
        services.registry.write().await.remove(session_id);
        finished_tx.send_replace(true);
        return Err(e.into());
    }
    info!(%session_id, %client_id, %endpoint, "session registered");
    services.emit(SessionEvent::Registered {
        session_id,
        client_id,
        endpoint,
    });

    let coordinator = StreamCoordinator::new(
        session_id,
        endpoint,
        chunker,
        (services.capture)(),
        Arc::clone(&services.datagrams),
        services.pacing(),
        Arc::clone(&services.registry),
        CoordinatorConfig {
            max_consecutive_send_failures: services.config.stream.max_consecutive_send_failures,
        },
    );
    let injector = Arc::new(InjectInputUseCase::new(Arc::clone(&services.injection)));
    let drain = tokio::spawn(drain_control(
        session_id,
        receiver,
        Arc::clone(&sender),
        Arc::clone(&injector),
        signal_tx,
        Arc::clone(&services.registry),
    ));

    let summary = coordinator.run(signal_rx).await;
    finished_tx.send_replace(true);
    if summary.reason != StopReason::Replaced {
        if let Some(code) = summary.reason.disconnect_reason() {
            sender.close(code).await;
        }
    }
    if let Err(e) = drain.await {
        warn!(%session_id, "control drain task failed: {e}");
    }
    debug!(
        %session_id,
        applied = injector.applied(),
        failed = injector.failed(),
        "input injection totals"
    );
    services.emit(SessionEvent::Ended(summary));
    Ok(Some(summary))
}

/// Returns the rejection reason for a request, if any.  Capacity is checked
/// later, atomically with registration.
fn admission_check(request: &RegisterMessage, config: &HostConfig) -> Option<RejectReason> {
    if request.protocol_version != PROTOCOL_VERSION {
        return Some(RejectReason::VersionMismatch);
    }
    if !config.sessions.is_allowed(&request.client_id) {
        return Some(RejectReason::Auth);
    }
    None
}

/// Where to send chunks: the requested host, or the control peer's IP.
fn datagram_endpoint(
    request: &RegisterMessage,
    peer: Option<SocketAddr>,
) -> Result<SocketAddr, NetworkError> {
    let ip = request
        .datagram_host
        .or_else(|| peer.map(|p| p.ip()))
        .ok_or(NetworkError::NoDatagramHost(request.client_id))?;
    Ok(SocketAddr::new(ip, request.datagram_port))
}

async fn reject(
    sender: &ControlSender,
    services: &HostServices,
    client_id: ClientId,
    peer: Option<SocketAddr>,
    reason: RejectReason,
) {
    info!(%client_id, ?peer, "registration rejected: {reason}");
    if let Err(e) = sender
        .send_message(&ControlMessage::RegisterRejected { reason })
        .await
    {
        debug!("rejection not delivered: {e}");
    }
    sender.close(DisconnectReason::UserInitiated).await;
    services.emit(SessionEvent::Rejected {
        client_id,
        peer,
        reason,
    });
}

/// Closes sessions with no control traffic within the inactivity timeout.
pub async fn run_session_sweeper(services: Arc<HostServices>, running: Arc<AtomicBool>) {
    let idle = services.config.sessions.inactivity_timeout();
    let mut ticker = tokio::time::interval(SWEEP_PERIOD);
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let expired = services.registry.write().await.sweep(idle);
        for session in expired {
            session.control.stop(StopReason::Expired).await;
        }
    }
}

/// Stops every active session, e.g. on host shutdown.
pub async fn stop_all_sessions(services: &HostServices) {
    let sessions = services.registry.read().await.all();
    for session in sessions {
        session.control.stop(StopReason::Requested).await;
    }
}
