//! Waiting policies for the queue's busy-spin loops.
//!
//! The default policy reproduces the queue's native behavior: spin on the
//! CPU without yielding, trading a burned core for the lowest wakeup
//! latency. Callers that prefer to give the CPU back can inject a yielding
//! or sleeping policy at construction time; the protocol itself is
//! unchanged, only the pause between retries differs.

use std::hint;
use std::thread;
use std::time::Duration;

use minstant::Instant;

/// How a spinning caller behaves between retries of a full-ring reservation,
/// a not-our-turn commit, or an empty-ring blocking pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Pure busy spin (`spin_loop` hint only). The default.
    Spin,
    /// Spin `spins` times, then `yield_now` between further retries.
    SpinYield {
        /// Retries before the first yield.
        spins: u32,
    },
    /// Spin `spins` times, then sleep `interval` between further retries.
    SpinSleep {
        /// Retries before the first sleep.
        spins: u32,
        /// Sleep duration once spinning gives up.
        interval: Duration,
    },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::Spin
    }
}

impl WaitStrategy {
    /// One pause step; `attempt` counts retries since the wait began.
    #[inline]
    pub(crate) fn pause(&self, attempt: u32) {
        match *self {
            Self::Spin => hint::spin_loop(),
            Self::SpinYield { spins } => {
                if attempt < spins {
                    hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            Self::SpinSleep { spins, interval } => {
                if attempt < spins {
                    hint::spin_loop();
                } else {
                    thread::sleep(interval);
                }
            }
        }
    }
}

/// Deadline specification for the `_blocking` queue operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl Timeout {
    #[inline]
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(Instant::now() + d),
        }
    }
}
