//! Clocks
//!
//! The Lamport counter piggybacked on every coordination message and
//! the Berkeley-adjustable application time.

mod logical;
mod app;

pub use logical::LogicalClock;
pub use app::{AppClock, unix_now};
