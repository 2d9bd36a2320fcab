//! Reservation handles: exclusive write access between claim and commit.
//!
//! A handle is proof that the sequencer granted this producer a slot (or a
//! run of slots) that nobody else may touch until the matching commit. The
//! handles are views into the queue's arena; the arena outlives every handle
//! because producers only hold them across a `&EventQueue` borrow.

use std::ptr::NonNull;

use crate::queue::Event;

/// Exclusive, uncommitted write access to exactly one slot.
///
/// Returned by [`EventQueue::reserve`](crate::EventQueue::reserve) with the
/// record already written in place; pass [`sequence`](Self::sequence) to
/// [`EventQueue::commit`](crate::EventQueue::commit) to publish it.
///
/// Deliberately neither `Clone` nor `Copy`: duplicating the handle would
/// duplicate write ownership of the slot.
#[derive(Debug)]
pub struct ReservedEvent {
    sequence: u64,
    slot: NonNull<u8>,
}

impl ReservedEvent {
    pub(crate) fn new(sequence: u64, slot: NonNull<u8>) -> Self {
        Self { sequence, slot }
    }

    /// The sequence number assigned to this reservation.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Raw address of the reserved slot.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.slot.as_ptr()
    }
}

// SAFETY: the handle may move to another thread along with the exclusive
// write ownership it represents; the slot bytes it points at are reachable
// by no other party until commit.
unsafe impl Send for ReservedEvent {}

/// Exclusive write access to one physically contiguous run of slots.
///
/// Slot `i` of the segment lives at `base + i * stride` for
/// `i in 0..count()`. The handle is a cheap view (`Copy`), not an owner of
/// buffer lifetime.
#[derive(Debug, Clone, Copy)]
pub struct ReservedEvents {
    last_sequence: u64,
    base: NonNull<u8>,
    count: usize,
    stride: usize,
}

impl ReservedEvents {
    pub(crate) fn new(last_sequence: u64, base: NonNull<u8>, count: usize, stride: usize) -> Self {
        debug_assert!(count >= 1);
        Self {
            last_sequence,
            base,
            count,
            stride,
        }
    }

    /// The last sequence number covered by this segment.
    ///
    /// This is the commit key: publish the segment with
    /// [`EventQueue::commit_batch`](crate::EventQueue::commit_batch)`(seg.sequence(), seg.count())`.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.last_sequence
    }

    /// The first sequence number covered by this segment.
    #[must_use]
    pub fn first_sequence(&self) -> u64 {
        self.last_sequence - self.count as u64 + 1
    }

    /// Number of slots in this segment.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw address of slot `index` within the segment.
    #[must_use]
    pub fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.count);
        // In-bounds: every segment lies within one physical lap of the arena.
        self.base.as_ptr().wrapping_add(index * self.stride)
    }

    /// Writes `record` into slot `index` of the segment.
    ///
    /// # Safety
    ///
    /// - `index < self.count()`
    /// - `size_of::<T>() <= stride` and `align_of::<T>()` divides the stride
    ///   (the queue's record contract); an oversized record corrupts the
    ///   neighboring slot
    /// - each slot is written at most once per reservation, and every slot
    ///   is written before the segment is committed
    pub unsafe fn emplace<T: Event>(&self, index: usize, record: T) {
        debug_assert!(index < self.count);
        debug_assert!(size_of::<T>() <= self.stride, "record larger than slot stride");
        debug_assert_eq!(self.stride % align_of::<T>(), 0, "stride must be a multiple of the record alignment");

        // SAFETY: the reservation grants exclusive access to these bytes and
        // the caller upholds the size/alignment contract above.
        unsafe {
            self.base
                .as_ptr()
                .add(index * self.stride)
                .cast::<T>()
                .write(record);
        }
    }
}

// SAFETY: same reasoning as ReservedEvent; the Copy-ability of the view does
// not widen access, since all writes still target slots this reservation
// exclusively owns until commit.
unsafe impl Send for ReservedEvents {}

/// Result of a range reservation: one segment, or two when the claimed
/// sequence range crosses the ring's physical end.
///
/// The segments jointly cover every claimed slot — the post-wrap remainder
/// is never dropped — and their slot counts sum to the claimed count. Each
/// segment is committed separately, first segment first.
#[derive(Debug, Clone, Copy)]
pub struct ReservedRange {
    first: ReservedEvents,
    wrapped: Option<ReservedEvents>,
}

impl ReservedRange {
    pub(crate) fn new(first: ReservedEvents, wrapped: Option<ReservedEvents>) -> Self {
        Self { first, wrapped }
    }

    /// The pre-wrap segment (the whole range when nothing wrapped).
    #[must_use]
    pub fn first(&self) -> &ReservedEvents {
        &self.first
    }

    /// The post-wrap segment, starting at physical slot 0, if the range
    /// crossed the ring boundary.
    #[must_use]
    pub fn wrapped(&self) -> Option<&ReservedEvents> {
        self.wrapped.as_ref()
    }

    /// Iterates the one or two segments in sequence order.
    pub fn segments(&self) -> impl Iterator<Item = &ReservedEvents> {
        std::iter::once(&self.first).chain(self.wrapped.as_ref())
    }

    /// Total slots reserved across all segments.
    ///
    /// Always equals the count passed to
    /// [`EventQueue::reserve_range`](crate::EventQueue::reserve_range).
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.first.count() + self.wrapped.map_or(0, |w| w.count())
    }

    /// The last sequence number of the whole range.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.wrapped.map_or(self.first.sequence(), |w| w.sequence())
    }
}
