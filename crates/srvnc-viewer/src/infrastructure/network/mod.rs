//! Network infrastructure for the viewer.
//!
//! Owns the control connection to the host:
//! - connects over TCP or WebSocket and registers the viewer,
//! - answers keepalive pings and reports reassembly losses on a timer,
//! - reconnects after the connection drops, until shut down.
//!
//! The live [`ControlSender`] is published through a `watch` channel so the
//! input forwarder always writes to the current connection, or to none.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use srvnc_core::protocol::messages::{
    ControlMessage, DisconnectReason, RegisterMessage, RejectReason, PROTOCOL_VERSION,
};
use srvnc_core::{ClientId, SessionId};
use srvnc_transport::control::{connect_tcp, connect_ws, open};
use srvnc_transport::handshake::register;
use srvnc_transport::{
    ChannelError, ControlReceiver, ControlSender, ControlTransportKind, HandshakeError,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::receive_frames::ReceiveFramesUseCase;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Configuration for the viewer's control connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host control endpoint.
    pub control_addr: SocketAddr,
    pub transport: ControlTransportKind,
    pub client_id: ClientId,
    /// Local UDP port the host should stream to.
    pub datagram_port: u16,
    /// Address the host should stream to; `None` lets the host use the
    /// control connection's source address.
    pub datagram_host: Option<IpAddr>,
    pub reconnect_interval: Duration,
    pub registration_timeout: Duration,
    pub loss_report_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            transport: ControlTransportKind::Tcp,
            client_id: Uuid::nil(),
            datagram_port: 10_000,
            datagram_host: None,
            reconnect_interval: Duration::from_secs(2),
            registration_timeout: Duration::from_secs(5),
            loss_report_interval: Duration::from_secs(1),
        }
    }
}

impl ConnectionConfig {
    fn registration(&self) -> RegisterMessage {
        RegisterMessage {
            client_id: self.client_id,
            protocol_version: PROTOCOL_VERSION,
            datagram_port: self.datagram_port,
            datagram_host: self.datagram_host,
        }
    }
}

/// Connection lifecycle as seen by the rest of the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected { session_id: SessionId },
    /// The host refused the registration.
    Rejected(RejectReason),
    /// An established session ended; a reconnect follows.
    ConnectionLost,
    /// The loop exited and will not reconnect.
    Stopped,
}

/// How an established session ended.
#[derive(Debug)]
enum LinkEnd {
    Disconnected(DisconnectReason),
    Lost(ChannelError),
}

/// Opens a control channel of the configured kind.
///
/// # Errors
///
/// Returns the transport's [`ChannelError`] if the host is unreachable.
pub async fn open_channel(
    config: &ConnectionConfig,
) -> Result<(ControlSender, ControlReceiver), ChannelError> {
    match config.transport {
        ControlTransportKind::Tcp => Ok(open(connect_tcp(config.control_addr).await?)),
        ControlTransportKind::WebSocket => {
            let url = format!("ws://{}", config.control_addr);
            Ok(open(connect_ws(&url).await?))
        }
    }
}

/// Starts the reconnect loop and returns its status stream.
///
/// `current` always holds the sender of the live session, or `None`.
pub fn start_connection(
    config: ConnectionConfig,
    frames: Arc<ReceiveFramesUseCase>,
    current: watch::Sender<Option<Arc<ControlSender>>>,
    running: Arc<AtomicBool>,
) -> (mpsc::Receiver<ConnectionStatus>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(128);
    let handle = tokio::spawn(run_connection_loop(config, frames, current, tx, running));
    (rx, handle)
}

/// Connect, register, serve, and reconnect until `running` clears or the
/// host refuses the viewer for good.
pub async fn run_connection_loop(
    config: ConnectionConfig,
    frames: Arc<ReceiveFramesUseCase>,
    current: watch::Sender<Option<Arc<ControlSender>>>,
    status: mpsc::Sender<ConnectionStatus>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        notify(&status, ConnectionStatus::Connecting).await;
        match open_channel(&config).await {
            Ok((sender, mut receiver)) => {
                let sender = Arc::new(sender);
                let verdict = register(
                    &sender,
                    &mut receiver,
                    config.registration(),
                    config.registration_timeout,
                )
                .await;
                match verdict {
                    Ok(accepted) => {
                        info!(
                            session_id = %accepted.session_id,
                            max_payload = accepted.max_payload_size,
                            checksums = accepted.checksums,
                            "registered with host"
                        );
                        // New session, new frame numbering.
                        frames.reset();
                        current.send_replace(Some(Arc::clone(&sender)));
                        notify(&status, ConnectionStatus::Connected { session_id: accepted.session_id })
                            .await;

                        let end = serve_session(&sender, receiver, &frames, &config, &running).await;
                        current.send_replace(None);
                        match end {
                            Some(LinkEnd::Disconnected(reason)) => {
                                info!("host closed the session: {reason:?}")
                            }
                            Some(LinkEnd::Lost(e)) => warn!("control channel lost: {e}"),
                            None => {
                                sender.close(DisconnectReason::UserInitiated).await;
                                break;
                            }
                        }
                        notify(&status, ConnectionStatus::ConnectionLost).await;
                    }
                    Err(HandshakeError::Rejected(reason)) => {
                        warn!("host rejected registration: {reason}");
                        notify(&status, ConnectionStatus::Rejected(reason)).await;
                        if reason != RejectReason::Capacity {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("registration failed: {e}");
                        sender.close(DisconnectReason::ProtocolError).await;
                    }
                }
            }
            Err(e) => warn!("could not reach host at {}: {e}", config.control_addr),
        }

        if running.load(Ordering::Relaxed) {
            debug!("reconnecting in {:?}", config.reconnect_interval);
            sleep_while_running(config.reconnect_interval, &running).await;
        }
    }
    current.send_replace(None);
    notify(&status, ConnectionStatus::Stopped).await;
}

/// Publishes a status change.  Nobody listening is not an error.
async fn notify(status: &mpsc::Sender<ConnectionStatus>, update: ConnectionStatus) {
    if let Err(e) = status.send(update).await {
        debug!("status update {:?} dropped, no listener", e.0);
    }
}

/// Serves one registered session.  Returns `None` on local shutdown.
async fn serve_session(
    sender: &Arc<ControlSender>,
    receiver: ControlReceiver,
    frames: &ReceiveFramesUseCase,
    config: &ConnectionConfig,
    running: &AtomicBool,
) -> Option<LinkEnd> {
    let mut reader = tokio::spawn(read_loop(receiver, Arc::clone(sender)));
    let mut reports = time::interval(config.loss_report_interval);
    reports.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = time::interval(SHUTDOWN_POLL);

    let end = loop {
        tokio::select! {
            joined = &mut reader => {
                break Some(joined.unwrap_or_else(|e| {
                    LinkEnd::Lost(ChannelError::Io(std::io::Error::other(e.to_string())))
                }));
            }
            _ = reports.tick() => {
                let report = frames.loss_report();
                if let Err(e) = sender.send_message(&ControlMessage::LossReport(report)).await {
                    debug!("loss report not sent: {e}");
                }
            }
            _ = poll.tick() => {
                if !running.load(Ordering::Relaxed) {
                    break None;
                }
            }
        }
    };
    if end.is_none() {
        reader.abort();
    }
    end
}

/// Reads host messages, answering pings, until the session ends.
async fn read_loop(mut receiver: ControlReceiver, sender: Arc<ControlSender>) -> LinkEnd {
    loop {
        match receiver.recv().await {
            Ok(ControlMessage::Ping(token)) => {
                if let Err(e) = sender.send_message(&ControlMessage::Pong(token)).await {
                    return LinkEnd::Lost(e);
                }
            }
            Ok(ControlMessage::Disconnect { reason }) => return LinkEnd::Disconnected(reason),
            Ok(ControlMessage::Pong(_)) => {}
            Ok(other) => debug!("ignoring {:?} from host", other.message_type()),
            Err(e) => return LinkEnd::Lost(e),
        }
    }
}

async fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = time::Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(time::Instant::now());
        if left.is_zero() {
            break;
        }
        time::sleep(SHUTDOWN_POLL.min(left)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use srvnc_core::protocol::messages::RegisterAcceptedMessage;
    use srvnc_core::ReassemblyConfig;
    use srvnc_transport::handshake::await_registration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        (listener, addr)
    }

    fn config(addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig {
            control_addr: addr,
            client_id: Uuid::new_v4(),
            reconnect_interval: Duration::from_millis(50),
            registration_timeout: Duration::from_secs(2),
            loss_report_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn accept(listener: &TcpListener) -> (ControlSender, ControlReceiver) {
        let (stream, _) = listener.accept().await.expect("accept");
        open(srvnc_transport::control::StreamTransport::tcp(stream))
    }

    async fn next_status(rx: &mut mpsc::Receiver<ConnectionStatus>) -> ConnectionStatus {
        time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("status in time")
            .expect("status channel open")
    }

    #[test]
    fn test_default_config_targets_local_host_over_tcp() {
        let cfg = ConnectionConfig::default();

        assert_eq!(cfg.control_addr.port(), 8765);
        assert_eq!(cfg.transport, ControlTransportKind::Tcp);
    }

    #[test]
    fn test_registration_carries_datagram_endpoint() {
        // Arrange
        let cfg = ConnectionConfig {
            datagram_port: 12_345,
            datagram_host: Some("10.0.0.7".parse().unwrap()),
            ..Default::default()
        };

        // Act
        let msg = cfg.registration();

        // Assert
        assert_eq!(msg.datagram_port, 12_345);
        assert_eq!(msg.datagram_host, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(msg.protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_accepted_session_publishes_sender_and_sends_loss_reports() {
        // Arrange
        let (listener, addr) = listener().await;
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let epoch_before = frames.epoch();
        let (current_tx, mut current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let (mut status, handle) =
            start_connection(config(addr), Arc::clone(&frames), current_tx, Arc::clone(&running));
        let (host_tx, mut host_rx) = accept(&listener).await;
        let request = await_registration(&mut host_rx, Duration::from_secs(2))
            .await
            .expect("register");
        let session_id = Uuid::new_v4();
        host_tx
            .send_message(&ControlMessage::RegisterAccepted(RegisterAcceptedMessage {
                session_id,
                max_payload_size: 1200,
                checksums: true,
            }))
            .await
            .expect("accept");

        // Assert
        assert_eq!(request.protocol_version, PROTOCOL_VERSION);
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connected { session_id });
        current_rx.wait_for(|s| s.is_some()).await.expect("sender published");
        assert!(frames.epoch() > epoch_before, "registration starts a new epoch");

        let report = time::timeout(Duration::from_secs(2), async {
            loop {
                if let ControlMessage::LossReport(r) = host_rx.recv().await.expect("recv") {
                    return r;
                }
            }
        })
        .await
        .expect("loss report in time");
        assert_eq!(report.delivered, 0);

        running.store(false, Ordering::Relaxed);
        handle.await.expect("loop exits");
    }

    #[tokio::test]
    async fn test_ping_from_host_is_answered() {
        let (listener, addr) = listener().await;
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let (current_tx, _current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));
        let mut cfg = config(addr);
        cfg.loss_report_interval = Duration::from_secs(60);

        let (_status, handle) = start_connection(cfg, frames, current_tx, Arc::clone(&running));
        let (host_tx, mut host_rx) = accept(&listener).await;
        await_registration(&mut host_rx, Duration::from_secs(2)).await.expect("register");
        host_tx
            .send_message(&ControlMessage::RegisterAccepted(RegisterAcceptedMessage {
                session_id: Uuid::new_v4(),
                max_payload_size: 1200,
                checksums: false,
            }))
            .await
            .expect("accept");
        host_tx.send_message(&ControlMessage::Ping(77)).await.expect("ping");

        let pong = time::timeout(Duration::from_secs(2), async {
            loop {
                if let ControlMessage::Pong(token) = host_rx.recv().await.expect("recv") {
                    return token;
                }
            }
        })
        .await
        .expect("pong in time");
        assert_eq!(pong, 77);

        running.store(false, Ordering::Relaxed);
        handle.await.expect("loop exits");
    }

    #[tokio::test]
    async fn test_auth_rejection_stops_without_retrying() {
        // Arrange
        let (listener, addr) = listener().await;
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let (current_tx, current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let (mut status, handle) = start_connection(config(addr), frames, current_tx, running);
        let (host_tx, mut host_rx) = accept(&listener).await;
        await_registration(&mut host_rx, Duration::from_secs(2)).await.expect("register");
        host_tx
            .send_message(&ControlMessage::RegisterRejected { reason: RejectReason::Auth })
            .await
            .expect("reject");

        // Assert
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Rejected(RejectReason::Auth));
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Stopped);
        time::timeout(Duration::from_secs(2), handle).await.expect("exits").expect("no panic");
        assert!(current_rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_host_disconnect_reports_connection_lost_and_clears_sender() {
        let (listener, addr) = listener().await;
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let (current_tx, mut current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        let (mut status, handle) =
            start_connection(config(addr), frames, current_tx, Arc::clone(&running));
        let (host_tx, mut host_rx) = accept(&listener).await;
        await_registration(&mut host_rx, Duration::from_secs(2)).await.expect("register");
        host_tx
            .send_message(&ControlMessage::RegisterAccepted(RegisterAcceptedMessage {
                session_id: Uuid::new_v4(),
                max_payload_size: 1200,
                checksums: true,
            }))
            .await
            .expect("accept");
        current_rx.wait_for(|s| s.is_some()).await.expect("connected");
        host_tx.close(DisconnectReason::ServerShutdown).await;

        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connecting);
        assert!(matches!(next_status(&mut status).await, ConnectionStatus::Connected { .. }));
        assert_eq!(next_status(&mut status).await, ConnectionStatus::ConnectionLost);
        current_rx.wait_for(|s| s.is_none()).await.expect("sender cleared");

        running.store(false, Ordering::Relaxed);
        handle.await.expect("loop exits");
    }

    #[tokio::test]
    async fn test_session_proceeds_after_status_listener_goes_away() {
        // Arrange
        let (listener, addr) = listener().await;
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let (current_tx, mut current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));
        let (status, handle) =
            start_connection(config(addr), frames, current_tx, Arc::clone(&running));
        drop(status);

        // Act
        let (host_tx, mut host_rx) = accept(&listener).await;
        await_registration(&mut host_rx, Duration::from_secs(2)).await.expect("register");
        host_tx
            .send_message(&ControlMessage::RegisterAccepted(RegisterAcceptedMessage {
                session_id: Uuid::new_v4(),
                max_payload_size: 1200,
                checksums: true,
            }))
            .await
            .expect("accept");

        // Assert
        time::timeout(Duration::from_secs(2), current_rx.wait_for(|s| s.is_some()))
            .await
            .expect("connected in time")
            .expect("sender published");
        running.store(false, Ordering::Relaxed);
        time::timeout(Duration::from_secs(2), handle).await.expect("exits").expect("no panic");
    }

    #[tokio::test]
    async fn test_unreachable_host_keeps_retrying_until_shutdown() {
        // Arrange: bind then drop so the port refuses connections.
        let (listener, addr) = listener().await;
        drop(listener);
        let frames = Arc::new(ReceiveFramesUseCase::new(ReassemblyConfig::default()));
        let (current_tx, _current_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let (mut status, handle) =
            start_connection(config(addr), frames, current_tx, Arc::clone(&running));

        // Assert
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut status).await, ConnectionStatus::Connecting);
        running.store(false, Ordering::Relaxed);
        time::timeout(Duration::from_secs(2), handle).await.expect("exits").expect("no panic");
    }
}
