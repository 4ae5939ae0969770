//! Bounded blocking SPSC channel for in-process (inter-thread) communication.
//!
//! # Overview
//!
//! - [`Sender`] - Write end (exactly one per channel)
//! - [`Receiver`] - Read end (exactly one per channel)
//! - Lock-free: the hot path is one acquire-load and one release-store;
//!   a side only enters the kernel when it has to park on a full or empty ring
//!
//! Dropping either end disconnects it. The sender fails fast once the
//! receiver is gone; the receiver drains everything already sent before it
//! reports the disconnect.
//!
//! # Example
//!
//! ```
//! use tether::sync::spsc;
//!
//! let (tx, rx) = spsc::channel::<u64>(1024)?;
//!
//! let producer = std::thread::spawn(move || {
//!     for i in 0..10_000 {
//!         tx.push(i).expect("receiver alive");
//!     }
//! });
//!
//! let mut expected = 0;
//! for value in rx {
//!     assert_eq!(value, expected);
//!     expected += 1;
//! }
//! assert_eq!(expected, 10_000);
//! producer.join().unwrap();
//! # Ok::<(), tether::sync::spsc::ChannelError>(())
//! ```
//!
//! # Batches
//!
//! [`Sender::write_n`] and [`Receiver::read_n`] move whole runs of slots per
//! synchronization round. A run crossing the end of the ring is transferred
//! in two rounds.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use thiserror::Error;

use crate::spsc::MAX_CAPACITY;
use crate::spsc::position::{Acquisition, Role};
use crate::spsc::shared::Shared;
use crate::trace::debug;

/// Errors returned by [`channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The requested capacity was zero.
    #[error("channel capacity must be greater than 0")]
    InvalidArgument,
    /// The requested capacity does not fit in a position word.
    #[error("channel capacity {requested} exceeds the maximum of {max}", max = MAX_CAPACITY)]
    Overflow { requested: usize },
}

/// Returned by [`Sender::push`] when the receiver has disconnected.
///
/// Carries the value that could not be sent.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Takes back the value that was not sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a disconnected channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Creates a bounded SPSC channel holding up to `capacity` unread values.
///
/// Returns the only [`Sender`] and [`Receiver`] that will ever exist for it.
/// Both are [`Send`] but not [`Sync`]: move each end to its thread.
///
/// # Errors
///
/// - [`ChannelError::InvalidArgument`] if `capacity` is zero
/// - [`ChannelError::Overflow`] if `capacity` exceeds [`MAX_CAPACITY`]
pub fn channel<T: Send>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), ChannelError> {
    if capacity == 0 {
        return Err(ChannelError::InvalidArgument);
    }
    if capacity > MAX_CAPACITY {
        return Err(ChannelError::Overflow {
            requested: capacity,
        });
    }

    let shared: NonNull<Shared<T>> = Shared::allocate(capacity as u32);
    debug!(capacity, "spsc channel created");

    Ok((
        Sender {
            shared,
            _marker: PhantomData,
        },
        Receiver {
            shared,
            _marker: PhantomData,
        },
    ))
}

/// Largest slot count a single acquisition may ask for.
#[inline]
fn request(remaining: usize) -> u32 {
    remaining.min(MAX_CAPACITY) as u32
}

/// An acquired range being filled or drained.
///
/// Dropping it releases the first `done` slots, so a panic from the
/// caller's iterator or `Extend` impl still leaves the ring consistent.
struct Reservation<'a, T> {
    shared: &'a Shared<T>,
    role: Role,
    acquisition: Acquisition,
    done: u32,
}

impl<'a, T> Reservation<'a, T> {
    fn new(shared: &'a Shared<T>, role: Role, acquisition: Acquisition) -> Self {
        Self {
            shared,
            role,
            acquisition,
            done: 0,
        }
    }

    /// Moves values from `source` into the range until it is full or
    /// `source` ends.
    fn fill<I: Iterator<Item = T>>(&mut self, source: &mut I) {
        while self.done < self.acquisition.len() {
            let Some(value) = source.next() else {
                break;
            };
            // SAFETY: The slot is inside our acquired range and currently
            // uninitialized.
            unsafe { self.shared.slot(self.acquisition.begin + self.done).write(value) };
            self.done += 1;
        }
    }

    fn is_full(&self) -> bool {
        self.done == self.acquisition.len()
    }
}

impl<T> Iterator for Reservation<'_, T> {
    type Item = T;

    /// Moves the next value out of a consumer range.
    fn next(&mut self) -> Option<T> {
        if self.is_full() {
            return None;
        }
        let index = self.acquisition.begin + self.done;
        self.done += 1;
        // SAFETY: The slot is inside our acquired range and holds a value
        // written by the producer; `done` now marks it as moved out.
        Some(unsafe { self.shared.slot(index).read() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.acquisition.len() - self.done) as usize;
        (left, Some(left))
    }
}

impl<T> ExactSizeIterator for Reservation<'_, T> {}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        let committed = self.acquisition.truncate(self.done);
        match self.role {
            Role::Producer => self.shared.producer_release(committed),
            Role::Consumer => self.shared.consumer_release(committed),
        }
    }
}

/// Write end of the channel.
///
/// # Thread Safety
///
/// `Sender` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Sender` (no concurrent `push()`)
pub struct Sender<T> {
    shared: NonNull<Shared<T>>,
    _marker: PhantomData<Shared<T>>,
}

/// Read end of the channel.
///
/// See [`Sender`] for thread safety details (same semantics apply).
pub struct Receiver<T> {
    shared: NonNull<Shared<T>>,
    _marker: PhantomData<Shared<T>>,
}

// SAFETY: A handle is the sole user of its side of the shared state. Moving
// it to another thread moves that role along with it.
unsafe impl<T: Send> Send for Sender<T> {}
unsafe impl<T: Send> Send for Receiver<T> {}

impl<T> Sender<T> {
    #[inline]
    fn shared(&self) -> &Shared<T> {
        // SAFETY: The state outlives both handles; it is freed only after
        // this one has disconnected in `drop`.
        unsafe { self.shared.as_ref() }
    }

    /// Maximum number of unread values the channel holds.
    pub fn capacity(&self) -> usize {
        self.shared().capacity() as usize
    }

    /// Sends a value, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`SendError`] if the receiver has
    /// disconnected.
    #[doc(alias = "emplace")]
    pub fn push(&self, value: T) -> Result<(), SendError<T>> {
        let shared = self.shared();
        let Some(acquisition) = shared.producer_acquire(1) else {
            return Err(SendError(value));
        };

        // SAFETY: The producer owns the acquired slot until it is released.
        unsafe { shared.slot(acquisition.begin).write(value) };
        shared.producer_release(acquisition);
        Ok(())
    }

    /// Sends up to `count` values taken from `source`, blocking as needed.
    ///
    /// Whole runs of free slots are filled per round. Returns `source`
    /// positioned after the last value sent, and `false` if the receiver
    /// disconnected before everything was sent. Values still in `source` at
    /// that point are left there.
    ///
    /// If `source` ends before `count` values, everything it produced is
    /// sent and the flag is `true`. The end is detected through
    /// [`Iterator::size_hint`] before waiting for room, so a source without
    /// an upper bound that ends exactly when the ring fills up may still
    /// block until a slot frees.
    pub fn write_n<I>(&self, mut source: I, count: usize) -> (I, bool)
    where
        I: Iterator<Item = T>,
    {
        let shared = self.shared();
        let mut remaining = count;

        loop {
            if let (_, Some(upper)) = source.size_hint() {
                remaining = remaining.min(upper);
            }
            if remaining == 0 {
                break;
            }

            let Some(acquisition) = shared.producer_acquire(request(remaining)) else {
                return (source, false);
            };

            let mut reservation = Reservation::new(shared, Role::Producer, acquisition);
            reservation.fill(&mut source);
            let exhausted = !reservation.is_full();
            remaining -= reservation.done as usize;
            drop(reservation);

            if exhausted {
                break;
            }
        }

        (source, true)
    }
}

impl<T> Receiver<T> {
    #[inline]
    fn shared(&self) -> &Shared<T> {
        // SAFETY: See `Sender::shared`.
        unsafe { self.shared.as_ref() }
    }

    /// Maximum number of unread values the channel holds.
    pub fn capacity(&self) -> usize {
        self.shared().capacity() as usize
    }

    /// Receives the next value, blocking while the channel is empty.
    ///
    /// Returns `None` once the sender has disconnected and every value it
    /// sent has been received.
    pub fn pop(&self) -> Option<T> {
        let shared = self.shared();
        let acquisition = shared.consumer_acquire(1)?;

        // SAFETY: The slot is inside our acquired range and was initialized
        // by the producer before it released the range to us.
        let value = unsafe { shared.slot(acquisition.begin).read() };
        shared.consumer_release(acquisition);
        Some(value)
    }

    /// Receives up to `count` values into `destination`, blocking as needed.
    ///
    /// Returns `true` if all `count` values were received, `false` if the
    /// sender disconnected and the channel ran dry first.
    ///
    /// If `destination` stops taking values from the iterator handed to its
    /// [`Extend::extend`], the call returns `true` right away and the values
    /// it left behind stay in the channel.
    pub fn read_n<E>(&self, destination: &mut E, count: usize) -> bool
    where
        E: Extend<T>,
    {
        let shared = self.shared();
        let mut remaining = count;

        while remaining != 0 {
            let Some(acquisition) = shared.consumer_acquire(request(remaining)) else {
                return false;
            };

            let mut reservation = Reservation::new(shared, Role::Consumer, acquisition);
            destination.extend(&mut reservation);
            let stalled = reservation.len() != 0;
            remaining -= reservation.done as usize;
            drop(reservation);

            if stalled {
                break;
            }
        }

        true
    }

    /// Blocking iterator over received values, ending on disconnect.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // SAFETY: Each handle disconnects exactly once, here.
        unsafe { Shared::drop_producer(self.shared) }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        // SAFETY: Each handle disconnects exactly once, here.
        unsafe { Shared::drop_consumer(self.shared) }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Borrowing iterator returned by [`Receiver::iter`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.pop()
    }
}

/// Owning iterator over a [`Receiver`].
#[derive(Debug)]
pub struct IntoIter<T> {
    receiver: Receiver<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.pop()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { receiver: self }
    }
}
