//! Wait-on-address backend for Windows, macOS and FreeBSD.
//!
//! Delegates to `atomic-wait`, which maps onto `WaitOnAddress`,
//! `__ulock_wait` and `_umtx_op` respectively.

use std::sync::atomic::{AtomicU32, Ordering};

use super::WaitWord;

#[repr(transparent)]
pub(crate) struct AddressWord {
    value: AtomicU32,
}

impl WaitWord for AddressWord {
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
        atomic_wait::wait(&self.value, expected);
    }

    #[inline]
    fn notify_one(&self) {
        atomic_wait::wake_one(&self.value as *const AtomicU32);
    }
}
