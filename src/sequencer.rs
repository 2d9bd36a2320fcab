//! The three-counter sequencing protocol.
//!
//! `reserved`, `committed` and `consumed` are monotonically non-decreasing
//! 64-bit counters that partition the ring into four regions: free,
//! reserved-but-unwritten, committed-unread, and consumed. All coordination
//! is CAS retry loops on these counters; there are no locks and no blocking
//! syscalls anywhere in the protocol.
//!
//! Invariants, holding at every instant:
//!
//! - `consumed <= committed <= reserved`
//! - `reserved - consumed < capacity` (occupancy bound)
//!
//! The protocol is lock-free but not wait-free: a producer can in principle
//! starve under permanent CAS contention. That is a documented liveness
//! caveat, not a correctness bug.

use std::sync::atomic::{AtomicU64, Ordering};

/// A protocol counter padded to its own cache line.
///
/// The three counters are written by different parties (producers commit,
/// the consumer advances, everyone reserves); keeping each on its own line
/// stops them from false-sharing.
#[repr(C)]
#[repr(align(64))]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
}

/// A contiguous run of claimed sequence numbers, `first..=last`.
///
/// Produced by [`Sequencer::try_claim`]; every claim is disjoint from every
/// other claim ever issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub(crate) first: u64,
    pub(crate) last: u64,
}

impl Claim {
    #[inline]
    pub(crate) fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Owner of the three counters and the CAS protocol that advances them.
pub(crate) struct Sequencer {
    capacity: u64,
    reserved: Counter,
    committed: Counter,
    consumed: Counter,
}

impl Sequencer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity as u64,
            reserved: Counter::new(),
            committed: Counter::new(),
            consumed: Counter::new(),
        }
    }

    /// Attempts to claim `count` fresh sequence numbers.
    ///
    /// Retries internally only on CAS contention; a full ring is reported to
    /// the caller as `None` so that waiting policy stays at the call site.
    /// Claims of `count >= capacity` can never succeed (the occupancy bound
    /// `reserved - consumed < capacity` would be violated) and always return
    /// `None`.
    #[inline]
    pub(crate) fn try_claim(&self, count: u64) -> Option<Claim> {
        debug_assert!(count >= 1);
        loop {
            let reserved = self.reserved.value.load(Ordering::Relaxed);
            // Acquire pairs with the consumer's release in `advance`: a slot
            // about to be reused on the next lap must not be written before
            // the consumer has finished reading the previous lap.
            let consumed = self.consumed.value.load(Ordering::Acquire);

            let candidate = reserved + count;
            if candidate - consumed >= self.capacity {
                return None;
            }

            if self
                .reserved
                .value
                .compare_exchange_weak(reserved, candidate, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Claim {
                    first: reserved + 1,
                    last: candidate,
                });
            }
            // Lost the race to another producer; retry with a fresh read.
        }
    }

    /// Attempts to publish the `count` sequences ending at `sequence`.
    ///
    /// Succeeds only when every earlier sequence has already been committed
    /// (`committed == sequence - count`), advancing `committed` to
    /// `sequence` in one step. Returns `false` when it is not yet this
    /// claim's turn; the caller spins.
    ///
    /// Publication is therefore strictly in order: `committed` only ever
    /// moves as a gapless, increasing prefix, regardless of the order in
    /// which producers finish writing.
    #[inline]
    pub(crate) fn try_commit(&self, sequence: u64, count: u64) -> bool {
        debug_assert!(count >= 1 && sequence >= count);
        // Release publishes the slot writes performed since the claim; pairs
        // with the consumer's acquire load in `next_committed`.
        self.committed
            .value
            .compare_exchange(sequence - count, sequence, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Next readable sequence, if any has been committed.
    #[inline]
    pub(crate) fn next_committed(&self) -> Option<u64> {
        let consumed = self.consumed.value.load(Ordering::Relaxed);
        // Acquire pairs with the committing producer's release store.
        let committed = self.committed.value.load(Ordering::Acquire);
        let next = consumed + 1;
        (next <= committed).then_some(next)
    }

    /// Marks `sequence` consumed.
    ///
    /// Plain store, not CAS: the protocol supports exactly one consumer, and
    /// concurrent callers would race on this counter.
    #[inline]
    pub(crate) fn advance(&self, sequence: u64) {
        debug_assert_eq!(
            sequence,
            self.consumed.value.load(Ordering::Relaxed) + 1,
            "consumer must advance one sequence at a time"
        );
        // Release pairs with the acquire in `try_claim`: producers must not
        // reuse this slot until the consumer's read of it is complete.
        self.consumed.value.store(sequence, Ordering::Release);
    }

    /// Splits a claim at the ring's physical boundary.
    ///
    /// Returns the slot count of the pre-wrap segment and, when the range
    /// actually wraps, the count of the post-wrap segment (which starts at
    /// physical slot 0). The two counts always sum to `claim.count()`.
    #[inline]
    pub(crate) fn split_at_wrap(&self, claim: Claim) -> (u64, Option<u64>) {
        let count = claim.count();
        // Number of sequences that spill past the ring's last physical slot.
        // Zero means the range ends exactly on the boundary; >= count means
        // it never touched the boundary. Both are contiguous.
        let spill = claim.last % self.capacity;
        if spill == 0 || spill >= count {
            (count, None)
        } else {
            (count - spill, Some(spill))
        }
    }

    #[inline]
    pub(crate) fn committed(&self) -> u64 {
        self.committed.value.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn consumed(&self) -> u64 {
        self.consumed.value.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn reserved(&self) -> u64 {
        self.reserved.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_sequential_and_bounded() {
        let seq = Sequencer::new(4);

        assert_eq!(seq.try_claim(1), Some(Claim { first: 1, last: 1 }));
        assert_eq!(seq.try_claim(2), Some(Claim { first: 2, last: 3 }));

        // Occupancy bound: reserved - consumed must stay below capacity.
        assert_eq!(seq.try_claim(1), None);
        assert!(seq.reserved() - seq.consumed() < 4);

        // Consuming frees a slot for the next lap.
        assert!(seq.try_commit(1, 1));
        assert_eq!(seq.next_committed(), Some(1));
        seq.advance(1);
        assert_eq!(seq.try_claim(1), Some(Claim { first: 4, last: 4 }));
    }

    #[test]
    fn oversized_claims_never_succeed() {
        let seq = Sequencer::new(4);
        assert_eq!(seq.try_claim(4), None);
        assert_eq!(seq.try_claim(17), None);
        assert_eq!(seq.try_claim(3), Some(Claim { first: 1, last: 3 }));
    }

    #[test]
    fn commit_is_strictly_ordered() {
        let seq = Sequencer::new(8);
        let a = seq.try_claim(1).unwrap();
        let b = seq.try_claim(1).unwrap();
        assert!(a.last < b.last);

        // b cannot publish before a has.
        assert!(!seq.try_commit(b.last, 1));
        assert_eq!(seq.committed(), 0);
        assert_eq!(seq.next_committed(), None);

        assert!(seq.try_commit(a.last, 1));
        assert!(seq.try_commit(b.last, 1));
        assert_eq!(seq.committed(), 2);
    }

    #[test]
    fn batch_commit_advances_in_one_step() {
        let seq = Sequencer::new(8);
        let claim = seq.try_claim(3).unwrap();
        assert_eq!(claim, Claim { first: 1, last: 3 });

        // Wrong turn: expecting committed == last - count.
        assert!(!seq.try_commit(claim.last, 1));
        assert!(seq.try_commit(claim.last, 3));
        assert_eq!(seq.committed(), 3);
    }

    #[test]
    fn consumer_sees_only_committed_prefix() {
        let seq = Sequencer::new(8);
        seq.try_claim(2).unwrap();
        assert_eq!(seq.next_committed(), None);

        assert!(seq.try_commit(2, 2));
        assert_eq!(seq.next_committed(), Some(1));
        seq.advance(1);
        assert_eq!(seq.next_committed(), Some(2));
        seq.advance(2);
        assert_eq!(seq.next_committed(), None);
    }

    #[test]
    fn wrap_split_covers_the_whole_claim() {
        let seq = Sequencer::new(8);

        // 7..=10 straddles the boundary: slots 6,7 then 0,1.
        let claim = Claim { first: 7, last: 10 };
        assert_eq!(seq.split_at_wrap(claim), (2, Some(2)));

        // 7..=8 ends exactly on the last physical slot: contiguous.
        assert_eq!(seq.split_at_wrap(Claim { first: 7, last: 8 }), (2, None));

        // 9..=10 starts right after the boundary: contiguous at slot 0.
        assert_eq!(seq.split_at_wrap(Claim { first: 9, last: 10 }), (2, None));

        // 8..=9 wraps with one sequence on each side.
        assert_eq!(seq.split_at_wrap(Claim { first: 8, last: 9 }), (1, Some(1)));

        // Entirely within the first lap.
        assert_eq!(seq.split_at_wrap(Claim { first: 1, last: 4 }), (4, None));
    }
}
