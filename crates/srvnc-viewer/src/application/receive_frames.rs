//! ReceiveFramesUseCase: datagrams in, newest complete frame out.
//!
//! # Pipeline (for beginners)
//!
//! ```text
//!  DatagramTransport ──► decode_chunk ──► SharedReassembly ──► watch slot ──► DisplaySink
//!   (receive task)                         ▲                  (latest wins)   (display task)
//!                                          │
//!                                    sweep task
//! ```
//!
//! The watch slot only ever holds the most recent complete frame.  If the
//! display is slower than the network, intermediate frames are overwritten
//! rather than queued, which is exactly "most recent wins".
//!
//! Every (re)registration starts a new *epoch*: the reassembly engine is
//! reset because the host numbers frames from 1 again for the new session.
//! The display task orders frames by `(epoch, frame_id)` so a new session's
//! first frame is never mistaken for an old one.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use srvnc_core::protocol::decode_chunk;
use srvnc_core::protocol::messages::LossReportMessage;
use srvnc_core::{ChunkOutcome, Frame, FrameId, ReassemblyConfig, ReassemblyStats, SharedReassembly};
use srvnc_transport::DatagramTransport;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// How long the receive loop blocks before re-checking the running flag.
const RECV_POLL: Duration = Duration::from_millis(200);

/// Consecutive stale chunks (with no delivery in between) after which the
/// host is assumed to have restarted its frame numbering.
pub const DEFAULT_STALE_RESET_THRESHOLD: u64 = 512;

/// Error returned by a [`DisplaySink`].
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display unavailable: {0}")]
    Unavailable(String),
}

/// Where completed frames go (a window, a decoder, a file...).
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink: Send + Sync {
    fn show(&self, frame: Frame) -> Result<(), DisplayError>;
}

/// A complete frame tagged with the session epoch it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestFrame {
    pub epoch: u64,
    pub frame: Frame,
}

impl LatestFrame {
    fn order_key(&self) -> (u64, FrameId) {
        (self.epoch, self.frame.frame_id)
    }
}

/// Datagram-level counters (reassembly keeps its own).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub datagrams: u64,
    pub malformed: u64,
    pub frames_published: u64,
    pub stale_resets: u64,
}

/// Owns the reassembly engine and the latest-frame slot.
pub struct ReceiveFramesUseCase {
    reassembly: SharedReassembly,
    latest: watch::Sender<Option<LatestFrame>>,
    stale_streak: AtomicU64,
    stale_reset_threshold: u64,
    datagrams: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    stale_resets: AtomicU64,
}

impl ReceiveFramesUseCase {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self::with_stale_reset(config, DEFAULT_STALE_RESET_THRESHOLD)
    }

    pub fn with_stale_reset(config: ReassemblyConfig, stale_reset_threshold: u64) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            reassembly: SharedReassembly::new(config),
            latest,
            stale_streak: AtomicU64::new(0),
            stale_reset_threshold,
            datagrams: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            published: AtomicU64::new(0),
            stale_resets: AtomicU64::new(0),
        }
    }

    /// Subscribes to completed frames.  Only the newest is ever visible.
    pub fn subscribe(&self) -> watch::Receiver<Option<LatestFrame>> {
        self.latest.subscribe()
    }

    pub fn reassembly(&self) -> &SharedReassembly {
        &self.reassembly
    }

    pub fn epoch(&self) -> u64 {
        self.reassembly.epoch()
    }

    /// Starts a new epoch: clears all partial frames and the delivery
    /// watermark.  Call when a new session is accepted.
    pub fn reset(&self) {
        let epoch = self.reassembly.reset();
        self.stale_streak.store(0, Ordering::Relaxed);
        debug!(epoch, "reassembly reset");
    }

    /// Decodes one datagram and feeds it to the engine.
    ///
    /// Returns the engine's verdict, or `None` if the datagram was not a
    /// valid chunk.
    pub fn handle_datagram(&self, from: SocketAddr, datagram: Bytes) -> Option<ChunkOutcome> {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        let chunk = match decode_chunk(datagram) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("dropping malformed datagram from {from}: {e}");
                return None;
            }
        };

        // The epoch comes from the same critical section as the outcome, so a
        // concurrent reset cannot relabel a frame.
        let (epoch, outcome) = self.reassembly.on_chunk_in_epoch(chunk);
        match &outcome {
            ChunkOutcome::Complete(frame) => {
                self.stale_streak.store(0, Ordering::Relaxed);
                self.publish(epoch, frame.clone());
            }
            ChunkOutcome::Stale { frame_id } => self.note_stale(*frame_id),
            ChunkOutcome::ChecksumMismatch { frame_id, chunk_index } => {
                debug!(frame_id, chunk_index, "checksum mismatch, waiting for a good copy");
            }
            ChunkOutcome::Rejected { frame_id, reason } => {
                debug!(frame_id, ?reason, "chunk rejected");
            }
            ChunkOutcome::Buffered { .. } | ChunkOutcome::Duplicate { .. } => {}
        }
        Some(outcome)
    }

    /// Abandons partial frames older than the reassembly timeout.
    pub fn sweep(&self) -> Vec<FrameId> {
        let abandoned = self.reassembly.sweep();
        if !abandoned.is_empty() {
            trace!(?abandoned, "partial frames timed out");
        }
        abandoned
    }

    pub fn loss_report(&self) -> LossReportMessage {
        self.reassembly.loss_report()
    }

    pub fn reassembly_stats(&self) -> ReassemblyStats {
        self.reassembly.stats()
    }

    pub fn stats(&self) -> ReceiveStats {
        ReceiveStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            frames_published: self.published.load(Ordering::Relaxed),
            stale_resets: self.stale_resets.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, epoch: u64, frame: Frame) {
        let latest = LatestFrame { epoch, frame };
        self.published.fetch_add(1, Ordering::Relaxed);
        self.latest.send_replace(Some(latest));
    }

    fn note_stale(&self, frame_id: FrameId) {
        let streak = self.stale_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= self.stale_reset_threshold {
            warn!(
                frame_id,
                last_delivered = ?self.reassembly.last_delivered(),
                "{streak} stale chunks in a row, host restarted its frame sequence"
            );
            self.stale_resets.fetch_add(1, Ordering::Relaxed);
            self.reset();
        }
    }
}

/// Feeds datagrams from `transport` into `use_case` until `running` clears.
pub async fn run_datagram_loop(
    transport: Arc<dyn DatagramTransport>,
    use_case: Arc<ReceiveFramesUseCase>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match timeout(RECV_POLL, transport.recv_from()).await {
            Ok(Ok((from, datagram))) => {
                use_case.handle_datagram(from, datagram);
            }
            Ok(Err(e)) => warn!("datagram receive error: {e}"),
            Err(_) => continue,
        }
    }
    debug!("datagram loop stopped");
}

/// Periodically abandons partial frames past the reassembly timeout.
pub async fn run_sweeper(use_case: Arc<ReceiveFramesUseCase>, running: Arc<AtomicBool>) {
    let period = (use_case.reassembly().timeout() / 2).max(Duration::from_millis(5));
    let mut ticker = tokio::time::interval(period);
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        use_case.sweep();
    }
}

/// Shows each new latest frame, never going backwards.
///
/// Returns the number of frames shown.
pub async fn run_display(
    mut latest: watch::Receiver<Option<LatestFrame>>,
    sink: Arc<dyn DisplaySink>,
    running: Arc<AtomicBool>,
) -> u64 {
    let mut last_shown: Option<(u64, FrameId)> = None;
    let mut shown = 0;
    while running.load(Ordering::Relaxed) {
        match timeout(RECV_POLL, latest.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
        let Some(next) = latest.borrow_and_update().clone() else {
            continue;
        };
        if last_shown.is_some_and(|prev| next.order_key() <= prev) {
            trace!(frame_id = next.frame.frame_id, "older than displayed frame, skipped");
            continue;
        }
        last_shown = Some(next.order_key());
        match sink.show(next.frame) {
            Ok(()) => shown += 1,
            Err(e) => warn!("display failed: {e}"),
        }
    }
    info!(shown, "display loop stopped");
    shown
}

#[cfg(test)]
mod tests {
    use super::*;
    use srvnc_core::protocol::encode_chunk;
    use srvnc_core::{ChecksumMode, Chunker};

    fn from() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9999))
    }

    fn datagrams(frame_id: FrameId, payload: &[u8], max: usize) -> Vec<Bytes> {
        let chunker = Chunker::new(max, ChecksumMode::Blake3).expect("chunker");
        let frame = Frame::new(frame_id, 0, payload.to_vec());
        chunker
            .chunk(&frame)
            .expect("chunks")
            .iter()
            .map(encode_chunk)
            .collect()
    }

    #[test]
    fn test_complete_frame_is_published_to_watch_slot() {
        // Arrange
        let use_case = ReceiveFramesUseCase::new(ReassemblyConfig::default());
        let mut rx = use_case.subscribe();

        // Act
        for d in datagrams(10, b"hello world", 4).into_iter().rev() {
            use_case.handle_datagram(from(), d);
        }

        // Assert
        assert!(rx.has_changed().expect("sender alive"));
        let latest = rx.borrow_and_update().clone().expect("frame");
        assert_eq!(latest.frame.frame_id, 10);
        assert_eq!(&latest.frame.payload[..], b"hello world");
        assert_eq!(use_case.stats().frames_published, 1);
    }

    #[test]
    fn test_garbage_datagram_is_counted_not_fatal() {
        let use_case = ReceiveFramesUseCase::new(ReassemblyConfig::default());

        let outcome = use_case.handle_datagram(from(), Bytes::from_static(b"\x01\x00junk"));

        assert!(outcome.is_none());
        assert_eq!(use_case.stats().malformed, 1);
    }

    #[test]
    fn test_reset_starts_new_epoch_and_accepts_low_ids_again() {
        // Arrange
        let use_case = ReceiveFramesUseCase::new(ReassemblyConfig::default());
        for d in datagrams(50, b"old session", 64) {
            use_case.handle_datagram(from(), d);
        }

        // Act
        use_case.reset();
        let outcome = datagrams(1, b"new session", 64)
            .into_iter()
            .filter_map(|d| use_case.handle_datagram(from(), d))
            .last();

        // Assert
        assert!(matches!(outcome, Some(ChunkOutcome::Complete(ref f)) if f.frame_id == 1));
        let latest = use_case.subscribe().borrow().clone().expect("frame");
        assert_eq!(latest.epoch, 1);
    }

    #[test]
    fn test_long_stale_streak_resets_engine() {
        // Arrange
        let use_case = ReceiveFramesUseCase::with_stale_reset(ReassemblyConfig::default(), 3);
        for d in datagrams(100, b"x", 8) {
            use_case.handle_datagram(from(), d);
        }

        // Act: a restarted host sends frames 1, 2, 3 (all stale), then 4.
        for id in 1..=3 {
            for d in datagrams(id, b"y", 8) {
                use_case.handle_datagram(from(), d);
            }
        }
        let after = datagrams(4, b"z", 8)
            .into_iter()
            .filter_map(|d| use_case.handle_datagram(from(), d))
            .last();

        // Assert
        assert_eq!(use_case.stats().stale_resets, 1);
        assert!(matches!(after, Some(ChunkOutcome::Complete(ref f)) if f.frame_id == 4));
    }

    #[tokio::test]
    async fn test_display_never_goes_backwards_within_epoch() {
        // Arrange
        let (tx, rx) = watch::channel(None);
        let mut sink = MockDisplaySink::new();
        let mut seq = mockall::Sequence::new();
        for id in [5u64, 7] {
            sink.expect_show()
                .withf(move |f| f.frame_id == id)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_display(rx, Arc::new(sink), Arc::clone(&running)));
        let frame = |epoch, id| Some(LatestFrame { epoch, frame: Frame::new(id, 0, vec![0u8]) });

        // Act
        for id in [5, 3, 7] {
            tx.send_replace(frame(0, id));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        running.store(false, Ordering::Relaxed);
        let shown = task.await.expect("join");

        // Assert
        assert_eq!(shown, 2);
    }

    #[tokio::test]
    async fn test_new_epoch_frame_is_shown_even_with_lower_id() {
        let (tx, rx) = watch::channel(None);
        let mut sink = MockDisplaySink::new();
        sink.expect_show().times(2).returning(|_| Ok(()));
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_display(rx, Arc::new(sink), Arc::clone(&running)));

        tx.send_replace(Some(LatestFrame { epoch: 0, frame: Frame::new(90, 0, vec![1u8]) }));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send_replace(Some(LatestFrame { epoch: 1, frame: Frame::new(1, 0, vec![2u8]) }));
        tokio::time::sleep(Duration::from_millis(30)).await;
        running.store(false, Ordering::Relaxed);

        assert_eq!(task.await.expect("join"), 2);
    }
}
