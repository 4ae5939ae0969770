//! Portable mutex + condition variable backend.
//!
//! Always compiled so the fallback is exercised on every platform, even when
//! a native backend is selected for channels.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use super::WaitWord;

pub(crate) struct CondvarWord {
    value: AtomicU32,
    lock: Mutex<()>,
    changed: Condvar,
}

impl WaitWord for CondvarWord {
    fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    #[inline]
    fn load(&self, order: Ordering) -> u32 {
        self.value.load(order)
    }

    #[inline]
    fn store(&self, value: u32, order: Ordering) {
        // Holding the lock keeps the store from landing between a waiter's
        // value check and its sleep, which would lose the wakeup.
        let _guard = self.lock.lock();
        self.value.store(value, order);
    }

    fn wait(&self, expected: u32) {
        let mut guard = self.lock.lock();
        while self.value.load(Ordering::Relaxed) == expected {
            self.changed.wait(&mut guard);
        }
    }

    #[inline]
    fn notify_one(&self) {
        self.changed.notify_one();
    }
}
