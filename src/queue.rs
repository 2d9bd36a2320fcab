//! The event queue: arena + sequencer behind one typed API.
//!
//! [`EventQueue`] owns a fixed-stride byte arena and the three-counter
//! sequencing protocol. Producers reserve slots (singly or in ranges),
//! construct their records in place, and commit; the single consumer pops
//! committed records in strict sequence order and runs each record's
//! [`Event::process`] before advancing its cursor.
//!
//! # Type erasure
//!
//! The queue stores raw bytes and has no record type information at runtime.
//! Matching the record type between writers and the reader, and sizing the
//! stride to fit it, is an external contract — which is why the typed entry
//! points are `unsafe`. The contract is `debug_assert!`-checked in debug
//! builds.
//!
//! # Concurrency
//!
//! Any number of producer threads may share `&EventQueue`; exactly one
//! thread may pop. Reservation is fully concurrent and unordered; commit
//! publication is strictly ordered; the consumer never observes a gap.

use std::fmt;

use minstant::Instant;
use thiserror::Error;

use crate::arena::{Arena, SLOT_ALIGN};
use crate::reservation::{ReservedEvent, ReservedEvents, ReservedRange};
use crate::sequencer::{Claim, Sequencer};
use crate::trace;
use crate::wait::{Timeout, WaitStrategy};

/// Contract for records stored in the queue.
///
/// The consumer invokes [`process`](Self::process) on every record, in
/// sequence order, as part of [`EventQueue::pop`] — before the consume
/// cursor advances.
pub trait Event {
    /// Handles the record on the consumer thread.
    fn process(&mut self);
}

/// Construction-time failures.
///
/// None of the hot-path primitives return this: capacity exhaustion is
/// value-level (`Err(record)` / `None`), and committing an out-of-turn
/// sequence livelocks by contract rather than failing fast.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Capacity of zero slots.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
    /// Stride of zero bytes.
    #[error("stride must be greater than zero")]
    ZeroStride,
    /// `capacity * stride` does not fit in `usize`.
    #[error("arena of {capacity} slots x {stride} bytes overflows usize")]
    ArenaOverflow {
        /// Requested slot count.
        capacity: usize,
        /// Requested per-slot byte size.
        stride: usize,
    },
    /// The allocator refused the arena.
    #[error("failed to allocate {bytes} byte arena")]
    AllocationFailed {
        /// Requested arena size in bytes.
        bytes: usize,
    },
}

/// Fixed-capacity, lock-free MPSC event queue.
///
/// Sequence numbers start at 1 and are never reused; sequence `n` owns
/// physical slot `(n - 1) % capacity`, a `stride`-byte cell in the arena.
/// At most `capacity - 1` sequences can be outstanding (reserved but not
/// consumed) at once.
pub struct EventQueue {
    arena: Arena,
    sequencer: Sequencer,
    wait: WaitStrategy,
}

impl EventQueue {
    /// Preallocates a queue of `capacity` slots of `stride` bytes each,
    /// with the default busy-spin wait strategy.
    ///
    /// # Errors
    ///
    /// Zero capacity or stride, arena size overflow, or allocation failure.
    pub fn new(capacity: usize, stride: usize) -> Result<Self, QueueError> {
        Self::with_wait_strategy(capacity, stride, WaitStrategy::default())
    }

    /// Like [`new`](Self::new), with an injected [`WaitStrategy`] governing
    /// every spinning loop (full-ring reservation, commit turn-taking,
    /// blocking pop).
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_wait_strategy(
        capacity: usize,
        stride: usize,
        wait: WaitStrategy,
    ) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if stride == 0 {
            return Err(QueueError::ZeroStride);
        }
        let arena = Arena::new(capacity, stride)?;
        trace::debug!(capacity, stride, "event queue created");
        Ok(Self {
            arena,
            sequencer: Sequencer::new(capacity),
            wait,
        })
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Per-slot byte size.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.arena.stride()
    }

    /// Number of committed events the consumer has not yet popped.
    ///
    /// A racing snapshot: `consumed` is read before `committed`, so a pop
    /// landing between the two loads can only inflate the difference, never
    /// underflow it. The result is clamped to the occupancy bound.
    #[must_use]
    pub fn len(&self) -> usize {
        let consumed = self.sequencer.consumed();
        let committed = self.sequencer.committed();
        (committed - consumed).min(self.capacity() as u64) as usize
    }

    /// Whether no committed events are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to reserve one slot and write `record` into it.
    ///
    /// Lock-free: retries internally only on CAS contention with other
    /// producers. On a full ring the record is handed back so the caller
    /// can retry or yield at its own call site.
    ///
    /// The returned handle carries the assigned sequence number; the event
    /// is invisible to the consumer until [`commit`](Self::commit)ted.
    ///
    /// # Errors
    ///
    /// `Err(record)` when `reserved - consumed` would reach capacity.
    ///
    /// # Safety
    ///
    /// `T` must fit the slot contract: `size_of::<T>() <= stride`,
    /// `align_of::<T>()` divides the stride and is at most 64. Violations
    /// corrupt neighboring slots and are only caught by debug assertions.
    pub unsafe fn try_reserve<T: Event>(&self, record: T) -> Result<ReservedEvent, T> {
        self.check_record::<T>();
        let Some(claim) = self.sequencer.try_claim(1) else {
            return Err(record);
        };
        let slot = self.arena.slot_ptr(claim.last);
        // SAFETY: the claim grants exclusive write access to this slot until
        // commit, and the caller upholds the size/alignment contract.
        unsafe { slot.as_ptr().cast::<T>().write(record) };
        Ok(ReservedEvent::new(claim.last, slot))
    }

    /// Reserves one slot, spinning through the configured wait strategy
    /// while the ring is full. Progress is bounded by the consumer's.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_reserve`](Self::try_reserve).
    #[must_use = "the reservation must be committed or the sequence never publishes"]
    pub unsafe fn reserve<T: Event>(&self, record: T) -> ReservedEvent {
        let mut record = record;
        let mut attempt = 0u32;
        loop {
            // SAFETY: forwarded caller contract.
            match unsafe { self.try_reserve(record) } {
                Ok(handle) => return handle,
                Err(returned) => {
                    record = returned;
                    self.wait.pause(attempt);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Attempts to reserve `count` contiguous sequence numbers for a bulk
    /// write.
    ///
    /// Returns one segment handle, or two when the range straddles the ring
    /// boundary — both physically contiguous, jointly covering all `count`
    /// slots. Write each slot with [`ReservedEvents::emplace`], then commit
    /// each segment with [`commit_batch`](Self::commit_batch), first
    /// segment first.
    ///
    /// Returns `None` when the ring cannot hold `count` more events right
    /// now, or when `count` is 0 or `>= capacity` (such a claim can never
    /// succeed).
    #[must_use]
    pub fn try_reserve_range(&self, count: usize) -> Option<ReservedRange> {
        if count == 0 || count >= self.capacity() {
            return None;
        }
        let claim = self.sequencer.try_claim(count as u64)?;
        Some(self.split_range(claim))
    }

    /// Reserves `count` slots, spinning while the ring is too full.
    ///
    /// `count` must be in `1..capacity`; a larger request can never be
    /// satisfied and would spin forever (debug-asserted).
    #[must_use]
    pub fn reserve_range(&self, count: usize) -> ReservedRange {
        debug_assert!(
            count >= 1 && count < self.capacity(),
            "range of {count} slots can never fit a ring of {}",
            self.capacity()
        );
        let mut attempt = 0u32;
        loop {
            if let Some(range) = self.try_reserve_range(count) {
                return range;
            }
            self.wait.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    fn split_range(&self, claim: Claim) -> ReservedRange {
        let stride = self.arena.stride();
        let (first_count, spill) = self.sequencer.split_at_wrap(claim);
        let first_last = claim.first + first_count - 1;
        let first = ReservedEvents::new(
            first_last,
            self.arena.slot_ptr(claim.first),
            first_count as usize,
            stride,
        );
        let wrapped = spill.map(|count| {
            // The post-wrap segment starts at physical slot 0.
            ReservedEvents::new(
                claim.last,
                self.arena.slot_ptr(first_last + 1),
                count as usize,
                stride,
            )
        });
        ReservedRange::new(first, wrapped)
    }

    /// Publishes `sequence`, making its event visible to the consumer.
    ///
    /// Spins until every earlier sequence has been committed: visibility
    /// always advances as a gapless, increasing prefix no matter in which
    /// order producers finish writing. Committing a sequence that can never
    /// become next in line (never reserved, already committed, or skipping
    /// ahead) spins forever — a contract violation, not a recoverable
    /// error.
    pub fn commit(&self, sequence: u64) {
        self.commit_inner(sequence, 1);
    }

    /// Batch form of [`commit`](Self::commit): publishes the `count`
    /// events ending at `sequence` in one step once their turn arrives.
    pub fn commit_batch(&self, sequence: u64, count: usize) {
        debug_assert!(count >= 1);
        self.commit_inner(sequence, count as u64);
    }

    fn commit_inner(&self, sequence: u64, count: u64) {
        let mut attempt = 0u32;
        while !self.sequencer.try_commit(sequence, count) {
            self.wait.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Pops and processes the next committed event.
    ///
    /// Non-blocking: returns `None` immediately when nothing is committed.
    /// Otherwise the record is read out of its slot, [`Event::process`] is
    /// invoked on it, and only then does the consume cursor advance. The
    /// processed record is returned to the caller and drops there — the
    /// queue itself never runs destructors inside the arena.
    ///
    /// # Safety
    ///
    /// - Exactly one thread may pop. The cursor advance is a plain store;
    ///   concurrent consumers would race on it.
    /// - `T` must be the type the producer stored at this sequence; the
    ///   arena is type-erased and a mismatch reinterprets raw bytes.
    /// - `T` must fit the slot contract (see [`try_reserve`](Self::try_reserve)).
    pub unsafe fn pop<T: Event>(&self) -> Option<T> {
        self.check_record::<T>();
        let sequence = self.sequencer.next_committed()?;
        // SAFETY: sequence <= committed, so the committing producer's
        // release ordered its slot write before our acquire load; reading
        // the record out transfers ownership to the consumer, and no
        // producer reuses the slot before `advance` releases it.
        let mut record = unsafe { self.arena.slot_ptr(sequence).as_ptr().cast::<T>().read() };
        record.process();
        self.sequencer.advance(sequence);
        Some(record)
    }

    /// Like [`pop`](Self::pop), but waits (per the wait strategy) until an
    /// event arrives or `timeout` expires.
    ///
    /// # Safety
    ///
    /// Same contract as [`pop`](Self::pop).
    pub unsafe fn pop_blocking<T: Event>(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        let mut attempt = 0u32;
        loop {
            // SAFETY: forwarded caller contract.
            if let Some(record) = unsafe { self.pop::<T>() } {
                return Some(record);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                trace::trace!("pop timed out");
                return None;
            }
            self.wait.pause(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    #[inline]
    fn check_record<T>(&self) {
        debug_assert!(
            size_of::<T>() <= self.arena.stride(),
            "record larger than slot stride"
        );
        debug_assert_eq!(
            self.arena.stride() % align_of::<T>(),
            0,
            "stride must be a multiple of the record alignment"
        );
        debug_assert!(
            align_of::<T>() <= SLOT_ALIGN,
            "record alignment exceeds arena alignment"
        );
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("capacity", &self.capacity())
            .field("stride", &self.stride())
            .field("committed", &self.sequencer.committed())
            .field("consumed", &self.sequencer.consumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Tick {
        value: u64,
        processed: bool,
    }

    impl Tick {
        fn new(value: u64) -> Self {
            Self {
                value,
                processed: false,
            }
        }
    }

    impl Event for Tick {
        fn process(&mut self) {
            self.processed = true;
        }
    }

    const STRIDE: usize = 16;

    #[test]
    fn construction_rejects_bad_config() {
        assert!(matches!(
            EventQueue::new(0, STRIDE),
            Err(QueueError::ZeroCapacity)
        ));
        assert!(matches!(EventQueue::new(8, 0), Err(QueueError::ZeroStride)));
    }

    #[test]
    fn round_trip_processes_the_record() {
        let queue = EventQueue::new(8, STRIDE).unwrap();

        let handle = unsafe { queue.try_reserve(Tick::new(7)) }.unwrap();
        assert_eq!(handle.sequence(), 1);

        // Reserved but uncommitted: invisible to the consumer.
        assert!(queue.is_empty());
        assert_eq!(unsafe { queue.pop::<Tick>() }, None);

        queue.commit(handle.sequence());
        assert_eq!(queue.len(), 1);

        let tick = unsafe { queue.pop::<Tick>() }.unwrap();
        assert_eq!(tick.value, 7);
        assert!(tick.processed);
        assert_eq!(unsafe { queue.pop::<Tick>() }, None);
    }

    #[test]
    fn records_pop_in_sequence_order() {
        let queue = EventQueue::new(8, STRIDE).unwrap();
        for value in 1..=5 {
            let handle = unsafe { queue.try_reserve(Tick::new(value)) }.unwrap();
            queue.commit(handle.sequence());
        }
        for value in 1..=5 {
            assert_eq!(unsafe { queue.pop::<Tick>() }.unwrap().value, value);
        }
    }

    #[test]
    fn full_ring_hands_the_record_back() {
        let queue = EventQueue::new(5, STRIDE).unwrap();

        // Capacity 5 admits 4 outstanding reservations (occupancy bound is
        // reserved - consumed < capacity).
        for value in 1..=4 {
            let handle = unsafe { queue.try_reserve(Tick::new(value)) }.unwrap();
            queue.commit(handle.sequence());
        }
        let rejected = unsafe { queue.try_reserve(Tick::new(5)) }.unwrap_err();
        assert_eq!(rejected.value, 5);

        // The consumer advancing past sequence 1 frees the next lap's slot.
        assert_eq!(unsafe { queue.pop::<Tick>() }.unwrap().value, 1);
        let handle = unsafe { queue.try_reserve(rejected) }.unwrap();
        assert_eq!(handle.sequence(), 5);
    }

    #[test]
    fn range_reservation_splits_at_the_wrap() {
        let queue = EventQueue::new(8, STRIDE).unwrap();

        // Drain sequences 1..=6 so the next range straddles the boundary.
        for value in 1..=6 {
            let handle = unsafe { queue.try_reserve(Tick::new(value)) }.unwrap();
            queue.commit(handle.sequence());
            unsafe { queue.pop::<Tick>() }.unwrap();
        }

        let range = queue.try_reserve_range(4).unwrap();
        assert_eq!(range.total_slots(), 4);
        assert_eq!(range.last_sequence(), 10);

        let first = range.first();
        assert_eq!((first.first_sequence(), first.sequence()), (7, 8));
        assert_eq!(first.count(), 2);

        let wrapped = range.wrapped().expect("range must wrap");
        assert_eq!((wrapped.first_sequence(), wrapped.sequence()), (9, 10));
        assert_eq!(wrapped.count(), 2);

        // Pre-wrap segment sits on the last physical slots, post-wrap
        // segment restarts at physical slot 0.
        assert_eq!(first.slot_ptr(0), queue.arena.slot_ptr(7).as_ptr());
        assert_eq!(wrapped.slot_ptr(0), queue.arena.slot_ptr(9).as_ptr());
        assert_eq!(queue.arena.slot_index(9), 0);

        // Both segments are independently writable and pop back in order.
        let mut value = 7;
        for segment in range.segments() {
            for i in 0..segment.count() {
                unsafe { segment.emplace(i, Tick::new(value)) };
                value += 1;
            }
            queue.commit_batch(segment.sequence(), segment.count());
        }
        for value in 7..=10 {
            assert_eq!(unsafe { queue.pop::<Tick>() }.unwrap().value, value);
        }
    }

    #[test]
    fn contiguous_range_is_a_single_segment() {
        let queue = EventQueue::new(8, STRIDE).unwrap();
        let range = queue.try_reserve_range(4).unwrap();
        assert!(range.wrapped().is_none());
        assert_eq!(range.first().count(), 4);
        assert_eq!(range.total_slots(), 4);
    }

    #[test]
    fn impossible_range_requests_fail_fast() {
        let queue = EventQueue::new(4, STRIDE).unwrap();
        assert!(queue.try_reserve_range(0).is_none());
        assert!(queue.try_reserve_range(4).is_none());
        assert!(queue.try_reserve_range(64).is_none());
        assert!(queue.try_reserve_range(3).is_some());
    }

    #[test]
    fn out_of_turn_commit_does_not_advance() {
        let queue = EventQueue::new(8, STRIDE).unwrap();
        let a = unsafe { queue.try_reserve(Tick::new(1)) }.unwrap();
        let b = unsafe { queue.try_reserve(Tick::new(2)) }.unwrap();

        // b's turn has not come: a single commit attempt must fail and
        // leave the committed prefix untouched.
        assert!(!queue.sequencer.try_commit(b.sequence(), 1));
        assert!(queue.is_empty());
        assert_eq!(unsafe { queue.pop::<Tick>() }, None);

        queue.commit(a.sequence());
        queue.commit(b.sequence());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pop_blocking_times_out_on_empty() {
        let queue = EventQueue::new(8, STRIDE).unwrap();
        let popped = unsafe {
            queue.pop_blocking::<Tick>(std::time::Duration::from_millis(5).into())
        };
        assert_eq!(popped, None);
    }
}
