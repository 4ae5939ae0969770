//! Core SPSC (Single-Producer Single-Consumer) channel machinery.
//!
//! - [`position`] - Position words and the acquire/release protocol
//! - [`shared`] - Ring storage, both positions and two-sided teardown
//!
//! The public handles built on top of this live in [`crate::sync::spsc`].

pub(crate) mod position;
pub(crate) mod shared;

/// Largest capacity a channel can be created with.
///
/// Positions keep their ring offset in the low 30 bits of a `u32`.
pub const MAX_CAPACITY: usize = position::POSITION_MASK as usize;
