//! Viewer-side frame reassembly with most-recent-wins semantics.
//!
//! # Why not wait for every frame? (for beginners)
//!
//! Screen frames go stale quickly.  If frame 10 is still missing a chunk when
//! frame 11 arrives complete, showing 10 afterwards would make the picture jump
//! backwards in time.  So the engine follows three rules:
//!
//! 1. Once frame N has been delivered, any chunk of a frame `<= N` is stale and
//!    dropped without allocating anything.
//! 2. Completing frame N discards every partial frame with a smaller id.
//! 3. Partial frames that stay incomplete for longer than the configured
//!    timeout are abandoned by [`ReassemblyEngine::sweep`].
//!
//! There are no retransmissions: a lost chunk means a lost frame, and the next
//! frame replaces it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::domain::checksum;
use crate::domain::frame::{current_timestamp_us, Chunk, Frame, FrameId};
use crate::protocol::messages::LossReportMessage;

/// Tuning knobs for [`ReassemblyEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblyConfig {
    /// How long a partial frame may wait for its missing chunks.
    pub timeout: Duration,
    /// Maximum number of partial frames tracked at once.
    pub max_in_flight: usize,
    /// Chunks with a larger `chunk_count` are rejected outright.
    pub max_chunk_count: u32,
    /// Maximum bytes buffered for a single partial frame.
    pub max_frame_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            max_in_flight: 8,
            max_chunk_count: 16_384,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Why a chunk was refused before being buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidChunk {
    ZeroChunkCount,
    IndexOutOfRange { index: u32, count: u32 },
    /// The chunk disagrees with earlier chunks of the same frame.
    CountMismatch { expected: u32, got: u32 },
    CountAboveLimit { count: u32, limit: u32 },
    FrameTooLarge { limit: usize },
    /// The in-flight table is full of newer frames.
    Backlog,
}

/// Result of feeding one chunk into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Stored; the frame is still missing chunks.
    Buffered {
        frame_id: FrameId,
        received: u32,
        expected: u32,
    },
    /// The last missing chunk arrived.
    Complete(Frame),
    /// The frame is not newer than the last delivered one.
    Stale { frame_id: FrameId },
    /// This index was already filled.
    Duplicate { frame_id: FrameId, chunk_index: u32 },
    /// The payload does not match its checksum.  The slot stays open.
    ChecksumMismatch { frame_id: FrameId, chunk_index: u32 },
    Rejected {
        frame_id: FrameId,
        reason: InvalidChunk,
    },
}

/// Cumulative counters since the engine was created or last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub delivered: u64,
    pub stale: u64,
    /// Partial frames discarded because a newer frame completed.
    pub superseded: u64,
    pub timed_out: u64,
    /// Partial frames discarded to respect `max_in_flight`.
    pub evicted: u64,
    pub checksum_mismatches: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

impl ReassemblyStats {
    /// Frames that were started but never delivered.
    pub fn abandoned(&self) -> u64 {
        self.superseded + self.timed_out + self.evicted
    }
}

struct ReassemblyEntry {
    chunk_count: u32,
    slots: Vec<Option<Bytes>>,
    received: u32,
    buffered_bytes: usize,
    first_seen: Instant,
}

impl ReassemblyEntry {
    fn new(chunk_count: u32, now: Instant) -> Self {
        Self {
            chunk_count,
            slots: vec![None; chunk_count as usize],
            received: 0,
            buffered_bytes: 0,
            first_seen: now,
        }
    }

    fn assemble(self) -> Bytes {
        if self.slots.len() == 1 {
            return self.slots.into_iter().flatten().next().unwrap_or_default();
        }
        let mut buf = BytesMut::with_capacity(self.buffered_bytes);
        for part in self.slots.into_iter().flatten() {
            buf.extend_from_slice(&part);
        }
        buf.freeze()
    }
}

/// Single-owner reassembly state machine.
///
/// Use [`SharedReassembly`] when the receive loop and the sweep timer run as
/// separate tasks.
pub struct ReassemblyEngine {
    config: ReassemblyConfig,
    entries: BTreeMap<FrameId, ReassemblyEntry>,
    last_delivered: Option<FrameId>,
    stats: ReassemblyStats,
}

impl ReassemblyEngine {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            last_delivered: None,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    /// Id of the newest frame handed out as [`ChunkOutcome::Complete`].
    pub fn last_delivered(&self) -> Option<FrameId> {
        self.last_delivered
    }

    /// Number of partial frames currently buffered.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if a partial frame with this id is buffered.
    pub fn is_tracking(&self, frame_id: FrameId) -> bool {
        self.entries.contains_key(&frame_id)
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Snapshot of the counters in the form the viewer sends to the host.
    pub fn loss_report(&self) -> LossReportMessage {
        LossReportMessage {
            last_delivered: self.last_delivered,
            delivered: self.stats.delivered,
            abandoned: self.stats.abandoned(),
            stale_chunks: self.stats.stale,
            checksum_failures: self.stats.checksum_mismatches,
        }
    }

    /// Forgets all partial frames, the delivery watermark, and the counters.
    ///
    /// Called when a new session starts, because frame ids restart from zero.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.last_delivered = None;
        self.stats = ReassemblyStats::default();
    }

    /// Feeds one chunk using the current instant.
    pub fn on_chunk(&mut self, chunk: Chunk) -> ChunkOutcome {
        self.on_chunk_at(chunk, Instant::now())
    }

    /// Feeds one chunk as if it arrived at `now`.
    pub fn on_chunk_at(&mut self, chunk: Chunk, now: Instant) -> ChunkOutcome {
        let frame_id = chunk.frame_id;

        if self.last_delivered.is_some_and(|last| frame_id <= last) {
            self.stats.stale += 1;
            trace!(frame_id, "dropping stale chunk");
            return ChunkOutcome::Stale { frame_id };
        }

        if let Err(reason) = self.validate(&chunk) {
            return self.reject(frame_id, reason);
        }

        if let Some(expected) = chunk.checksum {
            if !checksum::verify(&chunk.payload, expected) {
                self.stats.checksum_mismatches += 1;
                debug!(frame_id, chunk_index = chunk.chunk_index, "chunk checksum mismatch");
                return ChunkOutcome::ChecksumMismatch {
                    frame_id,
                    chunk_index: chunk.chunk_index,
                };
            }
        }

        if !self.entries.contains_key(&frame_id) && !self.make_room(frame_id) {
            return self.reject(frame_id, InvalidChunk::Backlog);
        }

        let limit = self.config.max_frame_bytes;
        let index = chunk.chunk_index as usize;
        let entry = self
            .entries
            .entry(frame_id)
            .or_insert_with(|| ReassemblyEntry::new(chunk.chunk_count, now));

        if entry.slots[index].is_some() {
            self.stats.duplicates += 1;
            return ChunkOutcome::Duplicate {
                frame_id,
                chunk_index: chunk.chunk_index,
            };
        }

        let buffered = entry.buffered_bytes + chunk.payload.len();
        if buffered > limit {
            self.entries.remove(&frame_id);
            return self.reject(frame_id, InvalidChunk::FrameTooLarge { limit });
        }

        entry.buffered_bytes = buffered;
        entry.received += 1;
        entry.slots[index] = Some(chunk.payload);

        let (received, expected) = (entry.received, entry.chunk_count);
        if received < expected {
            return ChunkOutcome::Buffered {
                frame_id,
                received,
                expected,
            };
        }

        match self.entries.remove(&frame_id) {
            Some(entry) => self.complete(frame_id, entry),
            None => ChunkOutcome::Buffered {
                frame_id,
                received,
                expected,
            },
        }
    }

    /// Abandons partial frames older than the configured timeout.
    ///
    /// Returns the ids of the abandoned frames.
    pub fn sweep(&mut self) -> Vec<FrameId> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> Vec<FrameId> {
        let timeout = self.config.timeout;
        let mut expired = Vec::new();
        self.entries.retain(|frame_id, entry| {
            let keep = now.saturating_duration_since(entry.first_seen) < timeout;
            if !keep {
                expired.push(*frame_id);
            }
            keep
        });
        if !expired.is_empty() {
            self.stats.timed_out += expired.len() as u64;
            debug!(frames = ?expired, "reassembly timeout");
        }
        expired
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn validate(&self, chunk: &Chunk) -> Result<(), InvalidChunk> {
        if chunk.chunk_count == 0 {
            return Err(InvalidChunk::ZeroChunkCount);
        }
        if chunk.chunk_index >= chunk.chunk_count {
            return Err(InvalidChunk::IndexOutOfRange {
                index: chunk.chunk_index,
                count: chunk.chunk_count,
            });
        }
        if chunk.chunk_count > self.config.max_chunk_count {
            return Err(InvalidChunk::CountAboveLimit {
                count: chunk.chunk_count,
                limit: self.config.max_chunk_count,
            });
        }
        if let Some(entry) = self.entries.get(&chunk.frame_id) {
            if entry.chunk_count != chunk.chunk_count {
                return Err(InvalidChunk::CountMismatch {
                    expected: entry.chunk_count,
                    got: chunk.chunk_count,
                });
            }
        }
        Ok(())
    }

    fn reject(&mut self, frame_id: FrameId, reason: InvalidChunk) -> ChunkOutcome {
        self.stats.rejected += 1;
        debug!(frame_id, ?reason, "rejected chunk");
        ChunkOutcome::Rejected { frame_id, reason }
    }

    /// Frees a slot for `frame_id` by evicting the oldest partial frame.
    ///
    /// Returns `false` if `frame_id` is itself older than everything tracked.
    fn make_room(&mut self, frame_id: FrameId) -> bool {
        if self.entries.len() < self.config.max_in_flight.max(1) {
            return true;
        }
        let oldest = match self.entries.first_key_value() {
            Some((&oldest, _)) => oldest,
            None => return true,
        };
        if frame_id < oldest {
            return false;
        }
        self.entries.remove(&oldest);
        self.stats.evicted += 1;
        debug!(evicted = oldest, incoming = frame_id, "in-flight table full");
        true
    }

    fn complete(&mut self, frame_id: FrameId, entry: ReassemblyEntry) -> ChunkOutcome {
        let payload = entry.assemble();

        let retained = match frame_id.checked_add(1) {
            Some(next) => self.entries.split_off(&next),
            None => BTreeMap::new(),
        };
        let superseded = std::mem::replace(&mut self.entries, retained);
        if !superseded.is_empty() {
            self.stats.superseded += superseded.len() as u64;
            debug!(
                frame_id,
                superseded = ?superseded.keys().collect::<Vec<_>>(),
                "newer frame completed first"
            );
        }

        self.last_delivered = Some(frame_id);
        self.stats.delivered += 1;
        ChunkOutcome::Complete(Frame::new(frame_id, current_timestamp_us(), payload))
    }
}

/// [`ReassemblyEngine`] behind one mutex, cheap to clone into several tasks.
///
/// The lock is held only for the duration of a single chunk or sweep, never
/// across an `.await`.  The mutex also guards an epoch counter that
/// [`reset`](Self::reset) advances, so every outcome can be attributed to the
/// epoch that produced it.
#[derive(Clone)]
pub struct SharedReassembly {
    inner: Arc<Mutex<EpochEngine>>,
}

struct EpochEngine {
    engine: ReassemblyEngine,
    epoch: u64,
}

impl SharedReassembly {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EpochEngine {
                engine: ReassemblyEngine::new(config),
                epoch: 0,
            })),
        }
    }

    pub fn on_chunk(&self, chunk: Chunk) -> ChunkOutcome {
        self.lock().engine.on_chunk(chunk)
    }

    /// Like [`on_chunk`](Self::on_chunk), also returning the epoch the chunk
    /// was reassembled in.
    pub fn on_chunk_in_epoch(&self, chunk: Chunk) -> (u64, ChunkOutcome) {
        let mut inner = self.lock();
        let outcome = inner.engine.on_chunk(chunk);
        (inner.epoch, outcome)
    }

    pub fn sweep(&self) -> Vec<FrameId> {
        self.lock().engine.sweep()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.lock().engine.stats()
    }

    pub fn last_delivered(&self) -> Option<FrameId> {
        self.lock().engine.last_delivered()
    }

    pub fn loss_report(&self) -> LossReportMessage {
        self.lock().engine.loss_report()
    }

    pub fn timeout(&self) -> Duration {
        self.lock().engine.config().timeout
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Clears the engine and starts the next epoch, returning it.
    pub fn reset(&self) -> u64 {
        let mut inner = self.lock();
        inner.engine.reset();
        inner.epoch += 1;
        inner.epoch
    }

    fn lock(&self) -> MutexGuard<'_, EpochEngine> {
        // A poisoned engine is still consistent enough to keep streaming.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
