//! Blocking wait/notify on a single 32-bit word.
//!
//! Each side of a channel publishes its position in one of these words and
//! parks on the peer's word when no range is available. Backends:
//!
//! - Linux: `futex(2)` in private mode via `rustix`
//! - Windows, macOS, FreeBSD: the OS wait-on-address primitive via `atomic-wait`
//! - Everything else (or with `--features portable-wait`): a mutex and
//!   condition variable pair
//!
//! All backends implement [`WaitWord`] with identical semantics. Only wakeup
//! latency differs.
//!
//! # Contract
//!
//! `wait(expected)` returns once the stored value differs from `expected`,
//! but it may also return spuriously. Callers must re-check their condition
//! in a loop.

use std::sync::atomic::Ordering;

#[cfg_attr(not(test), allow(dead_code))]
pub(crate) mod condvar;
#[cfg(all(
    not(feature = "portable-wait"),
    any(windows, target_os = "macos", target_os = "freebsd")
))]
mod address;
#[cfg(all(not(feature = "portable-wait"), target_os = "linux"))]
mod futex;

#[cfg(all(not(feature = "portable-wait"), target_os = "linux"))]
pub(crate) type PlatformWord = futex::FutexWord;

#[cfg(all(
    not(feature = "portable-wait"),
    any(windows, target_os = "macos", target_os = "freebsd")
))]
pub(crate) type PlatformWord = address::AddressWord;

#[cfg(any(
    feature = "portable-wait",
    not(any(
        target_os = "linux",
        windows,
        target_os = "macos",
        target_os = "freebsd"
    ))
))]
pub(crate) type PlatformWord = condvar::CondvarWord;

/// A `u32` that threads can block on until it changes.
pub(crate) trait WaitWord: Send + Sync {
    /// Creates a word holding `value`.
    fn new(value: u32) -> Self;

    fn load(&self, order: Ordering) -> u32;

    fn store(&self, value: u32, order: Ordering);

    /// Blocks until the value is observed to differ from `expected`.
    ///
    /// May return spuriously.
    fn wait(&self, expected: u32);

    /// Wakes at most one thread blocked in [`wait`](Self::wait).
    fn notify_one(&self);
}
