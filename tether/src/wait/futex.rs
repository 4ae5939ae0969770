//! Linux futex backend.
//!
//! The position word is exactly the 32 bits a futex operates on, so the
//! kernel parks directly on it with no hash table in between.

use std::sync::atomic::{AtomicU32, Ordering};

use rustix::thread::futex;

use super::WaitWord;

#[repr(transparent)]
pub(crate) struct FutexWord {
    value: AtomicU32,
}

impl WaitWord for FutexWord {
    fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    #[inline]
    fn load(&self, order: Ordering) -> u32 {
        self.value.load(order)
    }

    #[inline]
    fn store(&self, value: u32, order: Ordering) {
        self.value.store(value, order);
    }

    #[inline]
    fn wait(&self, expected: u32) {
        // EAGAIN (value already changed) and EINTR both count as a spurious
        // wakeup; the caller re-checks either way.
        let _ = futex::wait(&self.value, futex::Flags::PRIVATE, expected, None);
    }

    #[inline]
    fn notify_one(&self) {
        let _ = futex::wake(&self.value, futex::Flags::PRIVATE, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::contract;

    #[test]
    fn test_futex_contract() {
        contract::load_store::<FutexWord>();
        contract::wait_returns_when_value_differs::<FutexWord>();
        contract::notify_without_waiter_is_harmless::<FutexWord>();
    }

    #[test]
    fn test_futex_wakes_waiter() {
        contract::store_then_notify_wakes_waiter::<FutexWord>();
    }

    #[test]
    fn test_futex_ping_pong() {
        contract::ping_pong::<FutexWord>();
    }
}
