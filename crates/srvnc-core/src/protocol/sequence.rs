//! Lock-free monotonic counter used for message sequence numbers, event ids,
//! and frame ids.
//!
//! # Why atomics? (for beginners)
//!
//! Several tasks may stamp outgoing messages on the same connection at once
//! (the input forwarder and the loss reporter on the viewer, for example).
//! `fetch_add` on an `AtomicU64` hands each caller a unique value without a
//! lock, so no two messages ever share a number.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Starts at 0 unless built with [`SequenceCounter::starting_at`].  Wraps at
/// `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use srvnc_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            inner: AtomicU64::new(first),
        }
    }

    /// Returns the next value and advances the counter.
    ///
    /// `Relaxed` ordering is enough: the values only need to be unique and
    /// increasing, they do not publish other memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) would produce.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
