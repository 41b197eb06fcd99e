//! Frame pacing: how long the coordinator waits between capture ticks.
//!
//! The coordinator reports what happened after every tick and forwards every
//! loss report the viewer sends.  A [`PacingPolicy`] turns that feedback
//! into the next frame interval.

use std::time::Duration;

use srvnc_core::protocol::messages::LossReportMessage;
use tracing::debug;

/// Something the pacing policy should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum PacingFeedback {
    /// One capture tick finished.
    Tick { chunks_sent: u32, send_failures: u32 },
    /// The viewer's cumulative reassembly counters.
    LossReport(LossReportMessage),
}

/// Chooses the frame interval from feedback.
#[cfg_attr(test, mockall::automock)]
pub trait PacingPolicy: Send {
    /// Consumes one piece of feedback and returns the interval to use next.
    fn next_interval(&mut self, feedback: &PacingFeedback) -> Duration;

    /// The interval currently in effect.
    fn current(&self) -> Duration;
}

/// Always the same interval.  Useful for tests and fixed-rate demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl PacingPolicy for FixedInterval {
    fn next_interval(&mut self, _feedback: &PacingFeedback) -> Duration {
        self.0
    }

    fn current(&self) -> Duration {
        self.0
    }
}

/// Bounds and step sizes for [`AdaptiveInterval`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    /// Interval aimed for when the path is clean.
    pub base: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Multiplier applied on loss or send failure.
    pub backoff: f64,
    /// Fraction of the distance to `base` recovered per clean tick.
    pub recovery: f64,
}

impl AdaptiveConfig {
    /// Defaults around a given base interval: 4x headroom above, no
    /// faster than base / 2.
    pub fn around(base: Duration) -> Self {
        Self {
            base,
            min: base / 2,
            max: base * 4,
            backoff: 1.5,
            recovery: 0.1,
        }
    }
}

/// Widens the interval when frames get lost and eases back when they don't.
///
/// Loss is measured as the growth of the viewer's `abandoned` and
/// `checksum_failures` counters between consecutive reports.  A report whose
/// counters went backwards (the viewer restarted its engine) only resets the
/// baseline.
#[derive(Debug)]
pub struct AdaptiveInterval {
    config: AdaptiveConfig,
    current: Duration,
    last_report: Option<LossReportMessage>,
}

impl AdaptiveInterval {
    pub fn new(config: AdaptiveConfig) -> Self {
        let current = config.base.clamp(config.min, config.max);
        Self {
            config,
            current,
            last_report: None,
        }
    }

    fn widen(&mut self) {
        let widened = self.current.mul_f64(self.config.backoff);
        self.current = widened.clamp(self.config.min, self.config.max);
    }

    fn recover(&mut self) {
        let base = self.config.base;
        let step = |d: Duration| d.mul_f64(self.config.recovery).max(Duration::from_micros(1));
        self.current = if self.current > base {
            self.current.saturating_sub(step(self.current - base)).max(base)
        } else if self.current < base {
            (self.current + step(base - self.current)).min(base)
        } else {
            base
        };
    }

    fn new_losses(&self, report: &LossReportMessage) -> Option<u64> {
        let prev = self.last_report?;
        let abandoned = report.abandoned.checked_sub(prev.abandoned)?;
        let corrupted = report.checksum_failures.checked_sub(prev.checksum_failures)?;
        Some(abandoned.saturating_add(corrupted))
    }
}

impl PacingPolicy for AdaptiveInterval {
    fn next_interval(&mut self, feedback: &PacingFeedback) -> Duration {
        match feedback {
            PacingFeedback::Tick { send_failures, .. } if *send_failures > 0 => self.widen(),
            PacingFeedback::Tick { .. } => self.recover(),
            PacingFeedback::LossReport(report) => {
                let losses = self.new_losses(report);
                self.last_report = Some(*report);
                if let Some(n) = losses.filter(|&n| n > 0) {
                    debug!("viewer reported {n} lost frames, widening interval");
                    self.widen();
                }
            }
        }
        self.current
    }

    fn current(&self) -> Duration {
        self.current
    }
}
