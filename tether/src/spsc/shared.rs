//! State shared by one sender and one receiver.
//!
//! # Safety
//!
//! The APIs here are unsafe or hand out raw slot pointers because they rely on
//! the SPSC invariant: exactly one thread acts as producer and one as
//! consumer, and each only touches slots inside a range it has acquired.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use super::position::{self, Acquisition, DROP_FLAG, POSITION_MASK, REVOLUTION_FLAG, Role};
use crate::trace::{debug, trace};
use crate::wait::{PlatformWord, WaitWord};

/// A position word on its own cache line.
#[repr(C)]
#[repr(align(64))]
struct Position<W> {
    word: W,
}

/// Ring buffer, both positions and the teardown flag.
///
/// Allocated once by [`Shared::allocate`] and reclaimed by whichever handle
/// disconnects second.
#[repr(C)]
pub(crate) struct Shared<T, W: WaitWord = PlatformWord> {
    /// Written by the producer, read by the consumer.
    producer: Position<W>,

    /// Written by the consumer, read by the producer.
    consumer: Position<W>,

    /// Set by the first side to disconnect.
    either_dropped: AtomicBool,

    capacity: u32,

    /// `capacity` slots; each one is initialized iff it lies in
    /// `[consumer, producer)`.
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: Slots are only accessed through acquired ranges, which the position
// protocol keeps disjoint between the two sides. Element values cross threads,
// hence `T: Send`.
unsafe impl<T: Send, W: WaitWord> Send for Shared<T, W> {}
unsafe impl<T: Send, W: WaitWord> Sync for Shared<T, W> {}

impl<T, W: WaitWord> Shared<T, W> {
    /// Allocates the state on the heap and returns an owning raw pointer.
    ///
    /// The pointer must eventually be passed to both [`drop_producer`] and
    /// [`drop_consumer`], exactly once each.
    ///
    /// [`drop_producer`]: Self::drop_producer
    /// [`drop_consumer`]: Self::drop_consumer
    pub(crate) fn allocate(capacity: u32) -> NonNull<Self> {
        debug_assert!(capacity > 0 && capacity <= POSITION_MASK);

        let shared = Box::new(Self {
            producer: Position { word: W::new(0) },
            consumer: Position { word: W::new(0) },
            either_dropped: AtomicBool::new(false),
            capacity,
            // SAFETY: `UnsafeCell<MaybeUninit<T>>` is valid uninitialized;
            // nothing is read before a producer writes it.
            slots: unsafe {
                Box::<[UnsafeCell<MaybeUninit<T>>]>::new_uninit_slice(capacity as usize)
                    .assume_init()
            },
        });
        NonNull::from(Box::leak(shared))
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Raw pointer to slot `index`.
    ///
    /// Only valid to read or write while `index` is inside a range the caller
    /// acquired and has not yet released.
    #[inline]
    pub(crate) fn slot(&self, index: u32) -> *mut T {
        debug_assert!(index < self.capacity);
        self.slots[index as usize].get().cast::<T>()
    }

    #[inline]
    pub(crate) fn producer_acquire(&self, slots: u32) -> Option<Acquisition> {
        position::acquire(
            Role::Producer,
            &self.producer.word,
            &self.consumer.word,
            self.capacity,
            slots,
        )
    }

    #[inline]
    pub(crate) fn producer_release(&self, acquisition: Acquisition) {
        position::release(&self.producer.word, acquisition);
    }

    #[inline]
    pub(crate) fn consumer_acquire(&self, slots: u32) -> Option<Acquisition> {
        position::acquire(
            Role::Consumer,
            &self.consumer.word,
            &self.producer.word,
            self.capacity,
            slots,
        )
    }

    #[inline]
    pub(crate) fn consumer_release(&self, acquisition: Acquisition) {
        position::release(&self.consumer.word, acquisition);
    }

    /// Disconnects the producer side.
    ///
    /// # Safety
    ///
    /// `this` must come from [`allocate`](Self::allocate), and this must be
    /// the only call to `drop_producer` for it. The pointer must not be used
    /// by the producer afterwards.
    pub(crate) unsafe fn drop_producer(this: NonNull<Self>) {
        // SAFETY: Forwarded caller contract.
        unsafe { Self::disconnect(this, Role::Producer) }
    }

    /// Disconnects the consumer side.
    ///
    /// # Safety
    ///
    /// Same as [`drop_producer`](Self::drop_producer), for the consumer.
    pub(crate) unsafe fn drop_consumer(this: NonNull<Self>) {
        // SAFETY: Forwarded caller contract.
        unsafe { Self::disconnect(this, Role::Consumer) }
    }

    unsafe fn disconnect(this: NonNull<Self>, role: Role) {
        // SAFETY: The state stays alive until the second disconnect, and we
        // are at most the first one until the swap below.
        let shared = unsafe { this.as_ref() };
        let mine = match role {
            Role::Producer => &shared.producer.word,
            Role::Consumer => &shared.consumer.word,
        };

        // Relaxed is enough: everything worth publishing went out with the
        // last release store.
        let pos = mine.load(Ordering::Relaxed);
        mine.store(pos | DROP_FLAG, Ordering::Relaxed);
        mine.notify_one();

        debug!(?role, "channel side disconnected");

        // The first side to get here leaves the state to its peer and must
        // not touch it again. The second one tears it down.
        if shared.either_dropped.swap(true, Ordering::AcqRel) {
            // SAFETY: Both sides are gone, so nothing else references the
            // allocation made in `allocate`.
            drop(unsafe { Box::from_raw(this.as_ptr()) });
        }
    }
}

/// Slot ranges holding live elements, oldest first.
///
/// - producer ahead of consumer: one segment `[consumer, producer)`
/// - revolutions differ: the data wraps, `[consumer, capacity)` then
///   `[0, producer)` (this includes a completely full ring)
/// - identical positions: empty
pub(crate) fn live_segments(consumer: u32, producer: u32, capacity: u32) -> [Range<u32>; 2] {
    let different_revolution = ((consumer ^ producer) & REVOLUTION_FLAG) != 0;
    let begin = consumer & POSITION_MASK;
    let end = producer & POSITION_MASK;

    if end > begin {
        [begin..end, 0..0]
    } else if different_revolution {
        [begin..capacity, 0..end]
    } else {
        [0..0, 0..0]
    }
}

impl<T, W: WaitWord> Drop for Shared<T, W> {
    fn drop(&mut self) {
        let consumer = self.consumer.word.load(Ordering::Acquire);
        let producer = self.producer.word.load(Ordering::Acquire);

        let segments = live_segments(consumer, producer, self.capacity);
        trace!(
            leftover = segments[0].len() + segments[1].len(),
            capacity = self.capacity,
            "freeing channel state"
        );

        for segment in segments {
            for index in segment {
                // SAFETY: Slots in the live range hold initialized values that
                // no side will read anymore.
                unsafe { ptr::drop_in_place(self.slot(index)) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    type State<T> = Shared<T, PlatformWord>;

    fn fill(shared: &State<Tracked>, drops: &Arc<AtomicUsize>, count: u32) {
        let mut remaining = count;
        while remaining > 0 {
            let acq = shared.producer_acquire(remaining).unwrap();
            for index in acq.begin..acq.end {
                unsafe { shared.slot(index).write(Tracked(Arc::clone(drops))) };
            }
            remaining -= acq.len();
            shared.producer_release(acq);
        }
    }

    fn take(shared: &State<Tracked>, count: u32) {
        let mut remaining = count;
        while remaining > 0 {
            let acq = shared.consumer_acquire(remaining).unwrap();
            for index in acq.begin..acq.end {
                drop(unsafe { shared.slot(index).read() });
            }
            remaining -= acq.len();
            shared.consumer_release(acq);
        }
    }

    fn teardown<T>(this: NonNull<State<T>>) {
        unsafe {
            State::drop_producer(this);
            State::drop_consumer(this);
        }
    }

    #[test]
    fn test_live_segments() {
        let rev = REVOLUTION_FLAG;
        assert_eq!(live_segments(0, 0, 8), [0..0, 0..0]);
        assert_eq!(live_segments(rev | 3, rev | 3, 8), [0..0, 0..0]);
        assert_eq!(live_segments(2, 6, 8), [2..6, 0..0]);
        assert_eq!(live_segments(6, rev | 2, 8), [6..8, 0..2]);
        // Completely full ring.
        assert_eq!(live_segments(4, rev | 4, 8), [4..8, 0..4]);
        assert_eq!(live_segments(0, rev, 8), [0..8, 0..0]);
        // Drop flags are ignored.
        assert_eq!(live_segments(2 | DROP_FLAG, 6 | DROP_FLAG, 8), [2..6, 0..0]);
    }

    #[test]
    fn test_teardown_empty() {
        let drops = Arc::new(AtomicUsize::new(0));
        let this = State::<Tracked>::allocate(4);
        {
            let shared = unsafe { this.as_ref() };
            fill(shared, &drops, 3);
            take(shared, 3);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 3);
        teardown(this);
        assert_eq!(drops.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_teardown_single_segment() {
        let drops = Arc::new(AtomicUsize::new(0));
        let this = State::<Tracked>::allocate(8);
        {
            let shared = unsafe { this.as_ref() };
            fill(shared, &drops, 5);
            take(shared, 2);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 2);
        teardown(this);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_teardown_wrapped_segments() {
        let drops = Arc::new(AtomicUsize::new(0));
        let this = State::<Tracked>::allocate(8);
        {
            let shared = unsafe { this.as_ref() };
            fill(shared, &drops, 6);
            take(shared, 5);
            // Producer wraps: live range is now 5..8 and 0..3.
            fill(shared, &drops, 5);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
        teardown(this);
        assert_eq!(drops.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_teardown_full_ring() {
        let drops = Arc::new(AtomicUsize::new(0));
        let this = State::<Tracked>::allocate(4);
        {
            let shared = unsafe { this.as_ref() };
            fill(shared, &drops, 2);
            take(shared, 2);
            fill(shared, &drops, 4);
        }
        teardown(this);
        assert_eq!(drops.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_either_drop_order() {
        let drops = Arc::new(AtomicUsize::new(0));
        let this = State::<Tracked>::allocate(4);
        fill(unsafe { this.as_ref() }, &drops, 2);
        unsafe {
            State::drop_consumer(this);
            State::drop_producer(this);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_first_drop_closes_peer() {
        let this = State::<u32>::allocate(4);
        let shared = unsafe { this.as_ref() };

        let acq = shared.producer_acquire(1).unwrap();
        unsafe { shared.slot(acq.begin).write(7) };
        shared.producer_release(acq);

        // Producer gone: consumer still drains, then sees the close.
        unsafe { State::drop_producer(this) };
        let acq = shared.consumer_acquire(4).unwrap();
        assert_eq!(acq.len(), 1);
        assert_eq!(unsafe { shared.slot(acq.begin).read() }, 7);
        shared.consumer_release(acq);
        assert!(shared.consumer_acquire(1).is_none());

        unsafe { State::drop_consumer(this) };
    }

    #[test]
    fn test_condvar_backend_across_threads() {
        use crate::wait::condvar::CondvarWord;
        use std::thread;

        const TOTAL: u32 = 20_000;

        let this = Shared::<u32, CondvarWord>::allocate(3);
        let shared = unsafe { this.as_ref() };

        thread::scope(|s| {
            s.spawn(|| {
                let mut next = 0;
                while next < TOTAL {
                    let acq = shared.producer_acquire(TOTAL - next).unwrap();
                    for index in acq.begin..acq.end {
                        unsafe { shared.slot(index).write(next) };
                        next += 1;
                    }
                    shared.producer_release(acq);
                }
            });

            let mut expected = 0;
            while expected < TOTAL {
                let acq = shared.consumer_acquire(TOTAL - expected).unwrap();
                for index in acq.begin..acq.end {
                    assert_eq!(unsafe { shared.slot(index).read() }, expected);
                    expected += 1;
                }
                shared.consumer_release(acq);
            }
        });

        // Producer gone: an empty ring reports the close instead of parking.
        unsafe { Shared::<u32, CondvarWord>::drop_producer(this) };
        assert!(shared.consumer_acquire(1).is_none());
        unsafe { Shared::<u32, CondvarWord>::drop_consumer(this) };
    }

    #[test]
    fn test_slot_is_aligned() {
        #[repr(align(128))]
        struct Wide(#[allow(dead_code)] u8);

        let this = State::<Wide>::allocate(3);
        let shared = unsafe { this.as_ref() };
        for index in 0..3 {
            assert_eq!(shared.slot(index) as usize % 128, 0);
        }
        teardown(this);
    }
}
