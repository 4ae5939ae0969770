//! Bounded lock-free single-producer single-consumer channels.
//!
//! - [`sync::spsc`] - The channel: [`channel`], [`Sender`], [`Receiver`]
//!
//! Each side publishes its progress through a 32-bit position word and parks
//! on the peer's word (futex, wait-on-address, or a condvar fallback) when the
//! ring is full or empty.

pub(crate) mod spsc;
pub mod sync;
mod trace;
pub(crate) mod wait;

pub use spsc::MAX_CAPACITY;
pub use sync::spsc::{ChannelError, Receiver, SendError, Sender, channel};
pub use trace::init_tracing;
