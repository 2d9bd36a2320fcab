//! Fixed-stride byte arena backing the queue's slots.
//!
//! The arena is one 64-byte-aligned heap allocation of `capacity * stride`
//! bytes. It stores raw bytes only: records are written in place by the typed
//! entry points in [`crate::queue`] and the arena never runs destructors for
//! slot contents. Slots are reused indefinitely; a slot's previous bytes are
//! simply overwritten on the next lap of the ring.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::queue::QueueError;

/// Alignment of the arena base (and therefore of slot 0).
///
/// A record type is addressable at every slot as long as its alignment
/// divides the stride and does not exceed this value.
pub(crate) const SLOT_ALIGN: usize = 64;

/// The slot store: `capacity` fixed-stride byte cells.
#[derive(Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    capacity: usize,
    stride: usize,
    layout: Layout,
}

impl Arena {
    /// Allocates the arena.
    ///
    /// # Errors
    ///
    /// `ArenaOverflow` if `capacity * stride` does not fit in `usize`,
    /// `AllocationFailed` if the allocator refuses the block.
    pub(crate) fn new(capacity: usize, stride: usize) -> Result<Self, QueueError> {
        debug_assert!(capacity > 0 && stride > 0, "validated by EventQueue::new");

        let size = capacity
            .checked_mul(stride)
            .ok_or(QueueError::ArenaOverflow { capacity, stride })?;
        let layout = Layout::from_size_align(size, SLOT_ALIGN)
            .map_err(|_| QueueError::ArenaOverflow { capacity, stride })?;

        // SAFETY: layout has non-zero size (capacity and stride are both > 0).
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or(QueueError::AllocationFailed { bytes: size })?;

        Ok(Self {
            base,
            capacity,
            stride,
            layout,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    /// Physical slot index for a sequence number (`sequence >= 1`).
    #[inline]
    pub(crate) fn slot_index(&self, sequence: u64) -> usize {
        debug_assert!(sequence >= 1, "sequence numbers start at 1");
        ((sequence - 1) % self.capacity as u64) as usize
    }

    /// Address of the slot owned by `sequence`.
    ///
    /// The pointer is valid for `stride` bytes for as long as the arena is
    /// alive. Who may dereference it, and when, is governed entirely by the
    /// sequencer protocol.
    #[inline]
    pub(crate) fn slot_ptr(&self, sequence: u64) -> NonNull<u8> {
        let offset = self.slot_index(sequence) * self.stride;
        // SAFETY: slot_index < capacity, so offset + stride <= layout size
        // and the result cannot be null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base was allocated with exactly this layout and is
        // deallocated once (Arena is not Clone).
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: the arena itself is a plain byte allocation. Exclusive access to
// byte ranges within it is mediated by the sequencer's counter protocol, not
// by this type; handing references across threads is sound.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}
