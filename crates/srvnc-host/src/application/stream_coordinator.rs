//! StreamCoordinator: drives one session's frame stream.
//!
//! Every tick the coordinator pulls a frame from the [`CaptureSource`],
//! stamps it with the session's next frame id, chunks it and hands each
//! chunk to the [`DatagramTransport`].  Between ticks it listens for
//! [`CoordinatorSignal`]s: loss reports from the viewer feed the
//! [`PacingPolicy`], a stop signal ends the stream.
//!
//! The viewer's control messages are drained by a second task,
//! [`drain_control`], which forwards events to the injection use case and
//! turns disconnects into stop signals.
//!
//! # Architecture
//!
//! ```text
//!   CaptureSource ──► StreamCoordinator ──► Chunker ──► DatagramTransport
//!                          ▲
//!                          │ CoordinatorSignal (mpsc)
//!                          │
//!   ControlReceiver ──► drain_control ──► InjectInputUseCase ──► InjectionSink
//! ```
//!
//! Send failures are never retried.  The rest of a frame whose chunk failed
//! is skipped and the next tick starts a new frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use srvnc_core::protocol::encode_chunk;
use srvnc_core::protocol::messages::{ControlMessage, DisconnectReason, LossReportMessage};
use srvnc_core::protocol::SequenceCounter;
use srvnc_core::{Chunker, Frame, FrameId, SessionId};
use srvnc_transport::{ChannelError, ControlReceiver, ControlSender, DatagramTransport};
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::inject_input::InjectInputUseCase;
use super::pacing::{PacingFeedback, PacingPolicy};
use super::session_registry::{SessionRegistry, SessionState};

/// Registry shared between the control server and all coordinators.
pub type SharedRegistry<C> = Arc<RwLock<SessionRegistry<C>>>;

/// Capacity of each session's signal queue.
pub const SIGNAL_QUEUE_DEPTH: usize = 32;

// ── Collaborator seam ─────────────────────────────────────────────────────────

/// Error returned by a [`CaptureSource`].
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No frame this tick; try again next tick.
    #[error("capture unavailable: {0}")]
    Unavailable(String),
    /// The source is finished for good.
    #[error("capture source ended")]
    Ended,
}

/// Produces encoded frames.
///
/// The coordinator overwrites `frame_id` with its own per-session sequence;
/// sources may leave it at zero.
#[async_trait]
pub trait CaptureSource: Send {
    async fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Called whenever the frame interval changes.
    fn on_pacing(&mut self, _interval: Duration) {}
}

// ── Signals and outcomes ──────────────────────────────────────────────────────

/// Why a session's stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Host shutdown or an explicit stop.
    Requested,
    /// The viewer sent `Disconnect`.
    ViewerLeft,
    /// The control channel dropped or failed.
    ChannelLost,
    /// The same client registered again.
    Replaced,
    /// No control traffic within the inactivity timeout.
    Expired,
    /// Too many consecutive frames failed to send.
    TransportFailed,
    CaptureEnded,
}

impl StopReason {
    /// Reason code to put in the `Disconnect` sent to the viewer, if any.
    pub fn disconnect_reason(self) -> Option<DisconnectReason> {
        match self {
            StopReason::Requested => Some(DisconnectReason::ServerShutdown),
            StopReason::Replaced => Some(DisconnectReason::Replaced),
            StopReason::Expired => Some(DisconnectReason::Timeout),
            StopReason::TransportFailed | StopReason::CaptureEnded => {
                Some(DisconnectReason::ServerShutdown)
            }
            StopReason::ViewerLeft | StopReason::ChannelLost => None,
        }
    }
}

/// Message delivered to a running coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorSignal {
    Feedback(LossReportMessage),
    Stop(StopReason),
}

/// What the control server keeps per session: the way to reach the viewer,
/// the way to reach the coordinator, and a flag raised once its stream has
/// closed.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub control: Arc<ControlSender>,
    pub signals: mpsc::Sender<CoordinatorSignal>,
    pub finished: watch::Receiver<bool>,
}

impl SessionHandle {
    /// Waits up to `limit` for the coordinator to close its stream.
    ///
    /// Returns `false` on timeout.  A dropped flag sender counts as closed.
    pub async fn wait_finished(&self, limit: Duration) -> bool {
        let mut finished = self.finished.clone();
        let closed = timeout(limit, finished.wait_for(|done| *done)).await.is_ok();
        closed
    }

    /// Stops the coordinator and tells the viewer why.
    pub async fn stop(&self, reason: StopReason) {
        if self.signals.send(CoordinatorSignal::Stop(reason)).await.is_err() {
            debug!("coordinator already finished");
        }
        if let Some(code) = reason.disconnect_reason() {
            self.control.close(code).await;
        }
    }
}

/// Error that ends a stream from inside a tick.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0} consecutive frames failed to send")]
    TransportFailed(u32),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Result of one capture tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub frame_id: Option<FrameId>,
    pub chunks_sent: u32,
    pub send_failures: u32,
}

/// Cumulative per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    /// Frames dropped before sending: chunking refused or a chunk failed.
    pub frames_skipped: u64,
    pub capture_misses: u64,
}

/// Final record of a finished stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub session_id: SessionId,
    pub reason: StopReason,
    pub stats: StreamStats,
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Tuning knobs for [`StreamCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Ticks in a row with a send failure before the stream is abandoned.
    pub max_consecutive_send_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_send_failures: 30,
        }
    }
}

/// Streams frames to one viewer endpoint.
pub struct StreamCoordinator<C> {
    session_id: SessionId,
    endpoint: SocketAddr,
    chunker: Chunker,
    frame_ids: SequenceCounter,
    capture: Box<dyn CaptureSource>,
    transport: Arc<dyn DatagramTransport>,
    pacing: Box<dyn PacingPolicy>,
    registry: SharedRegistry<C>,
    config: CoordinatorConfig,
    stats: StreamStats,
    consecutive_failures: u32,
    streaming: bool,
}

impl<C: Clone + Send + Sync + 'static> StreamCoordinator<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        endpoint: SocketAddr,
        chunker: Chunker,
        capture: Box<dyn CaptureSource>,
        transport: Arc<dyn DatagramTransport>,
        pacing: Box<dyn PacingPolicy>,
        registry: SharedRegistry<C>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            session_id,
            endpoint,
            chunker,
            // Frame ids start at 1 so "nothing delivered yet" never collides
            // with a real frame.
            frame_ids: SequenceCounter::starting_at(1),
            capture,
            transport,
            pacing,
            registry,
            config,
            stats: StreamStats::default(),
            consecutive_failures: 0,
            streaming: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Captures, chunks and sends one frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Capture`] when the source has ended and
    /// [`StreamError::TransportFailed`] once the consecutive failure limit is
    /// reached.  Everything else is absorbed into the report and the stats.
    pub async fn tick(&mut self) -> Result<TickReport, StreamError> {
        let mut frame = match self.capture.next_frame().await {
            Ok(frame) => frame,
            Err(CaptureError::Unavailable(why)) => {
                debug!(session_id = %self.session_id, "no frame this tick: {why}");
                self.stats.capture_misses += 1;
                return Ok(TickReport::default());
            }
            Err(e) => return Err(e.into()),
        };
        frame.frame_id = self.frame_ids.next();

        let chunks = match self.chunker.chunk(&frame) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(session_id = %self.session_id, "skipping frame: {e}");
                self.stats.frames_skipped += 1;
                return Ok(TickReport {
                    frame_id: Some(frame.frame_id),
                    ..TickReport::default()
                });
            }
        };

        let mut report = TickReport {
            frame_id: Some(frame.frame_id),
            ..TickReport::default()
        };
        for chunk in &chunks {
            let datagram = encode_chunk(chunk);
            match self.transport.send_to(self.endpoint, &datagram).await {
                Ok(()) => {
                    report.chunks_sent += 1;
                    self.stats.chunks_sent += 1;
                    self.stats.bytes_sent += datagram.len() as u64;
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        frame_id = frame.frame_id,
                        chunk_index = chunk.chunk_index,
                        "send failed, skipping rest of frame: {e}"
                    );
                    report.send_failures += 1;
                    self.stats.send_failures += 1;
                    break;
                }
            }
        }

        if report.send_failures > 0 {
            self.stats.frames_skipped += 1;
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.config.max_consecutive_send_failures {
                return Err(StreamError::TransportFailed(self.consecutive_failures));
            }
            return Ok(report);
        }

        self.consecutive_failures = 0;
        self.stats.frames_sent += 1;
        let mut registry = self.registry.write().await;
        registry.record_sent(self.session_id, frame.frame_id);
        if !self.streaming {
            self.streaming = registry.set_state(self.session_id, SessionState::Streaming);
        }
        Ok(report)
    }

    /// Runs the stream until a stop signal, a fatal tick error, or the signal
    /// queue closing.  Leaves the session `Closed` and removed.
    pub async fn run(mut self, mut signals: mpsc::Receiver<CoordinatorSignal>) -> StreamSummary {
        info!(
            session_id = %self.session_id,
            endpoint = %self.endpoint,
            interval = ?self.pacing.current(),
            "stream started"
        );
        let mut interval = self.pacing.current();
        self.capture.on_pacing(interval);
        let mut deadline = Instant::now();

        let reason = loop {
            tokio::select! {
                biased;
                signal = signals.recv() => match signal {
                    Some(CoordinatorSignal::Feedback(report)) => {
                        self.pacing.next_interval(&PacingFeedback::LossReport(report));
                    }
                    Some(CoordinatorSignal::Stop(reason)) => break reason,
                    None => break StopReason::ChannelLost,
                },
                _ = sleep_until(deadline) => {
                    match self.tick().await {
                        Ok(report) => {
                            self.pacing.next_interval(&PacingFeedback::Tick {
                                chunks_sent: report.chunks_sent,
                                send_failures: report.send_failures,
                            });
                        }
                        Err(StreamError::Capture(_)) => break StopReason::CaptureEnded,
                        Err(e @ StreamError::TransportFailed(_)) => {
                            warn!(session_id = %self.session_id, "{e}");
                            break StopReason::TransportFailed;
                        }
                    }
                    deadline = Instant::now() + self.pacing.current();
                }
            }

            let current = self.pacing.current();
            if current != interval {
                debug!(session_id = %self.session_id, "frame interval {interval:?} -> {current:?}");
                interval = current;
                self.capture.on_pacing(interval);
            }
        };

        self.finish(reason).await
    }

    async fn finish(self, reason: StopReason) -> StreamSummary {
        let mut registry = self.registry.write().await;
        registry.set_state(self.session_id, SessionState::Draining);
        registry.set_state(self.session_id, SessionState::Closed);
        registry.remove(self.session_id);
        drop(registry);

        info!(
            session_id = %self.session_id,
            ?reason,
            frames = self.stats.frames_sent,
            failures = self.stats.send_failures,
            "stream closed"
        );
        StreamSummary {
            session_id: self.session_id,
            reason,
            stats: self.stats,
        }
    }
}

// ── Control drain ─────────────────────────────────────────────────────────────

/// Drains one viewer's control channel until it ends or the coordinator
/// finishes.
///
/// Events go to `injector` in arrival order; loss reports become pacing
/// feedback; pings are answered.  Every message counts as activity for the
/// registry's inactivity sweep.  The coordinator is told to stop when the
/// channel closes.
pub async fn drain_control<C: Clone + Send + Sync + 'static>(
    session_id: SessionId,
    mut receiver: ControlReceiver,
    sender: Arc<ControlSender>,
    injector: Arc<InjectInputUseCase>,
    signals: mpsc::Sender<CoordinatorSignal>,
    registry: SharedRegistry<C>,
) -> StopReason {
    let reason = loop {
        let msg = tokio::select! {
            received = receiver.recv() => received,
            _ = signals.closed() => return StopReason::Requested,
        };
        let msg = match msg {
            Ok(msg) => msg,
            Err(ChannelError::Disconnected) => break StopReason::ChannelLost,
            Err(e) => {
                warn!(%session_id, "control channel failed: {e}");
                break StopReason::ChannelLost;
            }
        };

        registry.write().await.touch(session_id);
        match msg {
            ControlMessage::Event(event) => {
                injector.handle(&event);
            }
            ControlMessage::LossReport(report) => {
                if signals.send(CoordinatorSignal::Feedback(report)).await.is_err() {
                    return StopReason::Requested;
                }
            }
            ControlMessage::Ping(token) => {
                if let Err(e) = sender.send_message(&ControlMessage::Pong(token)).await {
                    debug!(%session_id, "pong not sent: {e}");
                }
            }
            ControlMessage::Pong(_) => {}
            ControlMessage::Disconnect { reason } => {
                info!(%session_id, ?reason, "viewer disconnected");
                break StopReason::ViewerLeft;
            }
            other => {
                warn!(%session_id, "ignoring {:?} on an established session", other.message_type());
            }
        }
    };

    if signals.send(CoordinatorSignal::Stop(reason)).await.is_err() {
        debug!(%session_id, "coordinator already finished");
    }
    reason
}
