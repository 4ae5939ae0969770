//! Position words and the acquire/release protocol shared by both sides.
//!
//! Each side owns one 32-bit position word:
//!
//! ```text
//!  31   30   29                                   0
//! ┌────┬────┬──────────────────────────────────────┐
//! │drop│rev │ value: offset into the ring          │
//! └────┴────┴──────────────────────────────────────┘
//! ```
//!
//! The producer may write `[producer, consumer)` and the consumer may read
//! `[consumer, producer)`, both modulo capacity. Since the two ranges are
//! symmetric, one algorithm serves both sides with "mine" and "theirs"
//! swapped.
//!
//! When both values coincide the ring is either empty or full. The
//! revolution bit, flipped every time a side wraps past the end, tells the
//! two apart:
//!
//! - identical words: empty (consumer waits)
//! - words differing only in the revolution bit: full (producer waits)
//!
//! The drop bit rides along in the same word so a single acquire-load
//! reveals progress and disconnects at once.

use std::sync::atomic::Ordering;

use crate::trace::trace;
use crate::wait::WaitWord;

/// Bits holding the offset into the ring.
pub(crate) const POSITION_MASK: u32 = u32::MAX >> 2;

/// Toggled each time a side wraps around the end of the ring.
pub(crate) const REVOLUTION_FLAG: u32 = 1 << (u32::BITS - 2);

/// Set once a side has disconnected.
pub(crate) const DROP_FLAG: u32 = 1 << (u32::BITS - 1);

/// A contiguous slot range `[begin, end)` reserved by one side.
///
/// Committing it with [`release`] publishes `next` as the side's new
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Acquisition {
    pub begin: u32,
    pub end: u32,
    pub next: u32,
    /// Revolution bit of the position this range was acquired from.
    revolution: u32,
}

impl Acquisition {
    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    /// Shrinks the range to its first `len` slots.
    ///
    /// A shorter range never reaches the end of the ring, so `next` keeps the
    /// original revolution bit.
    #[inline]
    pub fn truncate(self, len: u32) -> Self {
        if len >= self.len() {
            return self;
        }
        let end = self.begin + len;
        Self {
            begin: self.begin,
            end,
            next: end | self.revolution,
            revolution: self.revolution,
        }
    }
}

/// Which side of the ring is acquiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Producer,
    Consumer,
}

impl Role {
    /// `mine ^ theirs` value at which this side has nothing to do.
    #[inline]
    pub const fn wait_mask(self) -> u32 {
        match self {
            Self::Producer => REVOLUTION_FLAG,
            Self::Consumer => 0,
        }
    }
}

/// Outcome of comparing two position snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Availability {
    /// No slots yet; park on the peer's word.
    Wait,
    /// The peer is gone and nothing is left for this side to do.
    Closed,
    Ready(Acquisition),
}

/// Decides what `role` can do given its own and the peer's position.
///
/// `slots` caps the length of the returned range. It must not exceed
/// [`POSITION_MASK`].
pub(crate) fn resolve(
    role: Role,
    mine: u32,
    theirs: u32,
    capacity: u32,
    slots: u32,
) -> Availability {
    debug_assert!(slots <= POSITION_MASK);

    let wait_mask = role.wait_mask();
    if (mine ^ theirs) == wait_mask {
        return Availability::Wait;
    }

    // A producer stops as soon as the consumer is gone. A consumer first
    // drains everything produced; it is done once the positions differ only
    // in the drop bit.
    if (theirs & DROP_FLAG) != 0 && (wait_mask != 0 || (mine ^ theirs) == DROP_FLAG) {
        return Availability::Closed;
    }

    let begin = mine & POSITION_MASK;
    let theirs_value = theirs & POSITION_MASK;

    // A range wrapping past the end is handed out as `[begin, capacity)`;
    // the next call picks up `[0, theirs)`.
    let mut end = if theirs_value > begin {
        theirs_value
    } else {
        capacity
    };
    end = end.min(begin + slots);

    let revolution = mine & REVOLUTION_FLAG;
    let next = if end == capacity {
        revolution ^ REVOLUTION_FLAG
    } else {
        end | revolution
    };

    Availability::Ready(Acquisition {
        begin,
        end,
        next,
        revolution,
    })
}

/// Reserves up to `slots` contiguous slots, blocking while none are free.
///
/// Returns `None` once the peer has disconnected (for a consumer: and every
/// produced element has been taken).
pub(crate) fn acquire<W: WaitWord>(
    role: Role,
    mine: &W,
    theirs: &W,
    capacity: u32,
    slots: u32,
) -> Option<Acquisition> {
    // Only this thread writes `mine`.
    let my_pos = mine.load(Ordering::Relaxed);

    loop {
        // Pairs with the release store in `release`.
        let their_pos = theirs.load(Ordering::Acquire);
        match resolve(role, my_pos, their_pos, capacity, slots) {
            Availability::Ready(acquisition) => return Some(acquisition),
            Availability::Closed => return None,
            Availability::Wait => {
                trace!(?role, position = their_pos, "parking on peer position");
                theirs.wait(their_pos);
            }
        }
    }
}

/// Commits an acquisition and wakes the peer if it is parked on `mine`.
#[inline]
pub(crate) fn release<W: WaitWord>(mine: &W, acquisition: Acquisition) {
    mine.store(acquisition.next, Ordering::Release);
    mine.notify_one();
}
