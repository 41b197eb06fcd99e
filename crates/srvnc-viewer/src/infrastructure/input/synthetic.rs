//! Scripted demo input: the pointer walks a square and clicks at each
//! corner.  Useful for exercising the control channel without a window.

use std::time::Duration;

use async_trait::async_trait;
use srvnc_core::{EventKind, MouseButton};
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::application::forward_input::InputSource;

const SIDE: i32 = 200;
const STEP: i32 = 10;

pub struct SyntheticInput {
    ticker: Interval,
    step: u64,
    pending: Vec<EventKind>,
    limit: Option<u64>,
    emitted: u64,
}

impl SyntheticInput {
    pub fn new(period: Duration) -> Self {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            ticker,
            step: 0,
            pending: Vec::new(),
            limit: None,
            emitted: 0,
        }
    }

    /// Ends the source after `events` events.
    pub fn with_limit(mut self, events: u64) -> Self {
        self.limit = Some(events);
        self
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Position on the square's perimeter after `step` moves.
    fn position(step: u64) -> (i32, i32) {
        let per_side = (SIDE / STEP) as u64;
        let side = (step / per_side) % 4;
        let along = ((step % per_side) as i32) * STEP;
        match side {
            0 => (along, 0),
            1 => (SIDE, along),
            2 => (SIDE - along, SIDE),
            _ => (0, SIDE - along),
        }
    }

    fn script_next(&mut self) {
        let step = self.step;
        self.step += 1;
        let (x, y) = Self::position(step);
        // Queue in reverse; `pending` is popped from the back.
        if step % (SIDE / STEP) as u64 == 0 {
            self.pending.push(EventKind::MouseButton { button: MouseButton::Left, pressed: false });
            self.pending.push(EventKind::MouseButton { button: MouseButton::Left, pressed: true });
        }
        self.pending.push(EventKind::MouseMove { x, y });
    }
}

#[async_trait]
impl InputSource for SyntheticInput {
    async fn poll(&mut self) -> Option<EventKind> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }
        if self.pending.is_empty() {
            self.ticker.tick().await;
            self.script_next();
        }
        let event = self.pending.pop()?;
        self.emitted += 1;
        Some(event)
    }
}
