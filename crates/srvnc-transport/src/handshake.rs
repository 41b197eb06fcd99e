//! Registration handshake helpers for both ends of a control channel.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use srvnc_core::protocol::messages::{
    ControlMessage, MessageType, RegisterAcceptedMessage, RegisterMessage, RejectReason,
};

use crate::control::{ChannelError, ControlReceiver, ControlSender};

/// Why a registration did not produce a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("registration rejected: {0}")]
    Rejected(RejectReason),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("no registration reply within {0:?}")]
    Timeout(Duration),

    #[error("unexpected {0:?} message during registration")]
    Unexpected(MessageType),
}

/// Viewer side: sends `request` and waits for the host's verdict.
///
/// Pings that arrive while waiting are answered.
///
/// # Errors
///
/// Returns [`HandshakeError::Rejected`] with the host's reason, or a channel,
/// timeout, or protocol-order error.
pub async fn register(
    sender: &ControlSender,
    receiver: &mut ControlReceiver,
    request: RegisterMessage,
    wait: Duration,
) -> Result<RegisterAcceptedMessage, HandshakeError> {
    sender.send_message(&ControlMessage::Register(request)).await?;
    timeout(wait, await_verdict(sender, receiver))
        .await
        .map_err(|_| HandshakeError::Timeout(wait))?
}

async fn await_verdict(
    sender: &ControlSender,
    receiver: &mut ControlReceiver,
) -> Result<RegisterAcceptedMessage, HandshakeError> {
    loop {
        match receiver.recv().await? {
            ControlMessage::RegisterAccepted(accepted) => return Ok(accepted),
            ControlMessage::RegisterRejected { reason } => {
                return Err(HandshakeError::Rejected(reason))
            }
            ControlMessage::Ping(token) => {
                sender.send_message(&ControlMessage::Pong(token)).await?;
            }
            other => return Err(HandshakeError::Unexpected(other.message_type())),
        }
    }
}

/// Host side: waits for the first message, which must be `Register`.
///
/// # Errors
///
/// Returns [`HandshakeError::Unexpected`] if the viewer opens with anything
/// else, or a channel/timeout error.
pub async fn await_registration(
    receiver: &mut ControlReceiver,
    wait: Duration,
) -> Result<RegisterMessage, HandshakeError> {
    let first = timeout(wait, receiver.recv())
        .await
        .map_err(|_| HandshakeError::Timeout(wait))??;
    match first {
        ControlMessage::Register(request) => {
            debug!(client_id = %request.client_id, "registration request received");
            Ok(request)
        }
        other => Err(HandshakeError::Unexpected(other.message_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{open, StreamTransport};
    use srvnc_core::protocol::messages::PROTOCOL_VERSION;
    use uuid::Uuid;

    fn request() -> RegisterMessage {
        RegisterMessage {
            client_id: Uuid::new_v4(),
            protocol_version: PROTOCOL_VERSION,
            datagram_port: 10_000,
            datagram_host: None,
        }
    }

    #[tokio::test]
    async fn test_rejection_reason_reaches_viewer() {
        // Arrange
        let (a, b) = tokio::io::duplex(4096);
        let (viewer_tx, mut viewer_rx) = open(StreamTransport::new(a, None));
        let (host_tx, mut host_rx) = open(StreamTransport::new(b, None));

        let host = tokio::spawn(async move {
            let req = await_registration(&mut host_rx, Duration::from_secs(2))
                .await
                .expect("register arrives");
            host_tx
                .send_message(&ControlMessage::RegisterRejected {
                    reason: RejectReason::Capacity,
                })
                .await
                .expect("reply");
            req
        });

        // Act
        let sent = request();
        let result = register(&viewer_tx, &mut viewer_rx, sent.clone(), Duration::from_secs(2)).await;

        // Assert
        assert!(matches!(result, Err(HandshakeError::Rejected(RejectReason::Capacity))));
        assert_eq!(host.await.expect("join"), sent);
    }

    #[tokio::test]
    async fn test_silent_host_times_out() {
        let (a, _b) = tokio::io::duplex(4096);
        let (viewer_tx, mut viewer_rx) = open(StreamTransport::new(a, None));

        let result = register(&viewer_tx, &mut viewer_rx, request(), Duration::from_millis(50)).await;

        assert!(matches!(result, Err(HandshakeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_host_refuses_non_register_opening() {
        let (a, b) = tokio::io::duplex(4096);
        let (viewer_tx, _viewer_rx) = open(StreamTransport::new(a, None));
        let (_host_tx, mut host_rx) = open(StreamTransport::new(b, None));

        viewer_tx.send_message(&ControlMessage::Ping(1)).await.expect("send");
        let result = await_registration(&mut host_rx, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(HandshakeError::Unexpected(MessageType::Ping))));
    }
}
