//! talos — fixed-capacity, lock-free MPSC event queue.
//!
//! A shared-memory ring of fixed-stride slots for many concurrent producers
//! and exactly one consumer, sequenced Disruptor-style by three atomic
//! counters instead of locks:
//!
//! - **Reservation** is fully concurrent: producers CAS-claim unique
//!   sequence numbers, singly or in contiguous ranges (ranges that cross
//!   the ring's physical end come back as two contiguous segments).
//! - **Commit** is strictly ordered: a producer publishes only when every
//!   earlier sequence is already published, so visibility advances as a
//!   gapless prefix.
//! - **Pop** is non-blocking and single-consumer: the next committed record
//!   is read out, its [`Event::process`] runs, and the consume cursor
//!   advances with a plain store.
//!
//! Records are constructed in place in a type-erased byte arena; the typed
//! entry points are `unsafe` because matching the record type and sizing
//! the stride is the caller's contract (debug-asserted).
//!
//! # Example
//!
//! ```
//! use talos::{Event, EventQueue};
//!
//! struct Tick(u64);
//!
//! impl Event for Tick {
//!     fn process(&mut self) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let queue = EventQueue::new(1024, 64)?;
//!
//! // Producer side: reserve, construct in place, commit.
//! let handle = unsafe { queue.reserve(Tick(41)) };
//! queue.commit(handle.sequence());
//!
//! // Consumer side: pop processes the record before advancing.
//! let tick = unsafe { queue.pop::<Tick>() }.expect("nothing committed");
//! assert_eq!(tick.0, 42);
//! # Ok::<(), talos::QueueError>(())
//! ```
//!
//! # What this is not
//!
//! No persistence, no multi-consumer fan-out, no dynamic resizing, no
//! network transport. Waiting is busy-spin throughout (configurable via
//! [`WaitStrategy`], never blocking syscalls in the protocol itself), and
//! the queue never runs destructors inside its arena.

mod arena;
pub mod queue;
pub mod reservation;
mod sequencer;
pub mod trace;
pub mod wait;

pub use queue::{Event, EventQueue, QueueError};
pub use reservation::{ReservedEvent, ReservedEvents, ReservedRange};
pub use wait::{Timeout, WaitStrategy};
