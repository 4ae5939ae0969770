//! Synchronization primitives for in-process communication.
//!
//! This module provides thread-safe channels for communication between
//! threads within the same process.

pub mod spsc;
