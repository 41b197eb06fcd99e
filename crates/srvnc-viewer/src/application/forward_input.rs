//! ForwardInputUseCase: local input events to the host's control channel.
//!
//! Events are forwarded in the order the [`InputSource`] yields them.  While
//! the viewer is disconnected, events are dropped at the source: replaying a
//! burst of stale clicks after a reconnect would do more harm than good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use srvnc_core::{ControlEvent, EventId, EventKind};
use srvnc_transport::{ChannelError, ControlSender};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

const POLL: Duration = Duration::from_millis(200);

/// Local keyboard/mouse source.
#[async_trait]
pub trait InputSource: Send {
    /// Waits for the next event.  `None` means the source is exhausted.
    async fn poll(&mut self) -> Option<EventKind>;
}

/// What happened to one input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Sent(EventId),
    /// Same position as the previous mouse move; not sent.
    Coalesced,
    /// No live control channel.
    Dropped,
}

/// Running totals for the forwarder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub sent: u64,
    pub coalesced: u64,
    pub dropped: u64,
}

/// Filters duplicate consecutive mouse moves.
#[derive(Default)]
struct DedupFilter {
    last_mouse_pos: Option<(i32, i32)>,
}

impl DedupFilter {
    fn should_send(&mut self, kind: &EventKind) -> bool {
        match kind {
            EventKind::MouseMove { x, y } => {
                if self.last_mouse_pos == Some((*x, *y)) {
                    return false;
                }
                self.last_mouse_pos = Some((*x, *y));
                true
            }
            _ => true,
        }
    }

    fn reset(&mut self) {
        self.last_mouse_pos = None;
    }
}

#[derive(Default)]
pub struct ForwardInputUseCase {
    dedup: DedupFilter,
    stats: ForwardStats,
}

impl ForwardInputUseCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats
    }

    /// Sends `kind` on `sender`, or drops it if there is no live channel.
    pub async fn forward(&mut self, sender: Option<&ControlSender>, kind: EventKind) -> ForwardOutcome {
        let Some(sender) = sender.filter(|s| s.is_connected()) else {
            return self.drop_event(&kind);
        };
        if !self.dedup.should_send(&kind) {
            self.stats.coalesced += 1;
            return ForwardOutcome::Coalesced;
        }
        let name = kind.name();
        match sender.send(ControlEvent::new(kind)).await {
            Ok(id) => {
                trace!(event_id = id, kind = name, "input forwarded");
                self.stats.sent += 1;
                ForwardOutcome::Sent(id)
            }
            Err(ChannelError::Disconnected) => {
                self.stats.dropped += 1;
                self.dedup.reset();
                ForwardOutcome::Dropped
            }
            Err(e) => {
                warn!(kind = name, "input event lost: {e}");
                self.stats.dropped += 1;
                self.dedup.reset();
                ForwardOutcome::Dropped
            }
        }
    }

    fn drop_event(&mut self, kind: &EventKind) -> ForwardOutcome {
        debug!(kind = kind.name(), "not connected, input event dropped");
        self.stats.dropped += 1;
        // The host may have moved the cursor meanwhile; resend the next move.
        self.dedup.reset();
        ForwardOutcome::Dropped
    }
}

/// Forwards events from `source` to whichever channel `current` holds.
///
/// Runs until the source is exhausted or `running` clears.
pub async fn run_input_forwarder(
    mut source: Box<dyn InputSource>,
    current: watch::Receiver<Option<Arc<ControlSender>>>,
    running: Arc<AtomicBool>,
) -> ForwardStats {
    let mut use_case = ForwardInputUseCase::new();
    while running.load(Ordering::Relaxed) {
        let kind = match timeout(POLL, source.poll()).await {
            Ok(Some(kind)) => kind,
            Ok(None) => break,
            Err(_) => continue,
        };
        let sender = current.borrow().clone();
        use_case.forward(sender.as_deref(), kind).await;
    }
    let stats = use_case.stats();
    debug!(?stats, "input forwarder stopped");
    stats
}
